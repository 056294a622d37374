//! Fixed-size cell partition over a region
//!
//! Cells are `cell_size` degrees square, anchored at the north-west corner
//! of the region. The last column and row are clipped to the region so the
//! union of all cells is exactly the region.

use mosaico_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::tile_id::TileId;

/// Slack, in cell units, applied when turning coordinates into cell indices.
///
/// Widening by this much means a coordinate lying on a cell boundary always
/// selects both touching cells even after floating point rounding; callers
/// refine with exact box tests.
const INDEX_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridSpec", into = "GridSpec")]
pub struct SpatialGrid {
    bounds: BoundingBox,
    cell_size: f64,
    columns: u32,
    rows: u32,
}

/// Serialized form; counts are re-derived and checked on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GridSpec {
    bounds: BoundingBox,
    cell_size: f64,
    columns: u32,
    rows: u32,
}

/// One candidate tile of the grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    pub id: TileId,
    pub bounds: BoundingBox,
}

/// Inclusive column/row span of cells touched by a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub col_min: u32,
    pub col_max: u32,
    pub row_min: u32,
    pub row_max: u32,
}

impl CellRange {
    pub fn len(&self) -> usize {
        ((self.col_max - self.col_min + 1) as usize) * ((self.row_max - self.row_min + 1) as usize)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Column-major iteration, matching lexicographic tile id order.
    pub fn iter(&self) -> impl Iterator<Item = TileId> {
        let rows = self.row_min..=self.row_max;
        (self.col_min..=self.col_max)
            .flat_map(move |c| rows.clone().map(move |r| TileId::new(c, r)))
    }
}

/// Number of cells of size `cell` needed to span `extent`.
///
/// An extent that is an exact multiple of the cell size (up to rounding)
/// does not get an extra sliver cell.
fn cell_count(extent: f64, cell: f64) -> u32 {
    let raw = extent / cell;
    let nearest = raw.round();
    let n = if (raw - nearest).abs() <= INDEX_EPSILON * nearest.max(1.0) {
        nearest
    } else {
        raw.ceil()
    };
    n.max(1.0) as u32
}

impl SpatialGrid {
    /// Build the grid over `bounds`.
    pub fn build(bounds: BoundingBox, cell_size: f64) -> Result<Self> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(Error::Config(format!(
                "cell size must be positive, got {cell_size}"
            )));
        }
        if bounds.is_degenerate() {
            return Err(Error::Config(
                "grid bounds must have positive extent".to_string(),
            ));
        }
        let columns = cell_count(bounds.width(), cell_size);
        let rows = cell_count(bounds.height(), cell_size);
        if u64::from(columns) * u64::from(rows) > u64::from(u32::MAX) {
            return Err(Error::Config(format!(
                "grid of {columns}x{rows} cells is too large, increase cell_size"
            )));
        }
        Ok(Self {
            bounds,
            cell_size,
            columns,
            rows,
        })
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cell_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn contains_cell(&self, id: TileId) -> bool {
        id.column < self.columns && id.row < self.rows
    }

    /// Box of one cell; the last column/row is clipped to the grid bounds.
    pub fn cell_bounds(&self, id: TileId) -> Option<BoundingBox> {
        if !self.contains_cell(id) {
            return None;
        }
        let b = &self.bounds;
        let s = self.cell_size;

        let west = b.west() + f64::from(id.column) * s;
        let east = if id.column + 1 == self.columns {
            b.east()
        } else {
            (b.west() + f64::from(id.column + 1) * s).min(b.east())
        };
        let north = b.north() - f64::from(id.row) * s;
        let south = if id.row + 1 == self.rows {
            b.south()
        } else {
            (b.north() - f64::from(id.row + 1) * s).max(b.south())
        };

        Some(BoundingBox::from_parts_unchecked(north, south, east, west))
    }

    /// All candidate cells, column-major.
    pub fn cells(&self) -> impl Iterator<Item = GridCell> + '_ {
        self.full_range().iter().filter_map(move |id| {
            self.cell_bounds(id).map(|bounds| GridCell { id, bounds })
        })
    }

    pub fn full_range(&self) -> CellRange {
        CellRange {
            col_min: 0,
            col_max: self.columns - 1,
            row_min: 0,
            row_max: self.rows - 1,
        }
    }

    /// Cells whose boxes intersect `region`, from corner arithmetic alone.
    ///
    /// A region edge on a cell boundary includes the cells on both sides.
    /// The span may include one extra cell at a boundary because of the
    /// index epsilon; callers needing exactness test `cell_bounds`.
    pub fn cell_range(&self, region: &BoundingBox) -> Option<CellRange> {
        let r = self.bounds.intersection(region)?;
        let b = &self.bounds;
        let s = self.cell_size;

        let lo = |offset: f64| ((offset / s - INDEX_EPSILON).ceil() - 1.0).max(0.0);
        let hi = |offset: f64, count: u32| (offset / s + INDEX_EPSILON).floor().min(f64::from(count - 1)).max(0.0);

        let col_min = lo(r.west() - b.west()) as u32;
        let col_max = hi(r.east() - b.west(), self.columns) as u32;
        let row_min = lo(b.north() - r.north()) as u32;
        let row_max = hi(b.north() - r.south(), self.rows) as u32;

        Some(CellRange {
            col_min: col_min.min(col_max),
            col_max,
            row_min: row_min.min(row_max),
            row_max,
        })
    }

    /// The single cell whose half-open interior holds the coordinate.
    ///
    /// Points on the east/south edge of the grid belong to the last cell.
    pub fn cell_at(&self, lat: f64, lon: f64) -> Option<TileId> {
        if !self.bounds.contains_point(lat, lon) {
            return None;
        }
        let col = ((lon - self.bounds.west()) / self.cell_size).floor() as u32;
        let row = ((self.bounds.north() - lat) / self.cell_size).floor() as u32;
        Some(TileId::new(col.min(self.columns - 1), row.min(self.rows - 1)))
    }
}

impl TryFrom<GridSpec> for SpatialGrid {
    type Error = Error;

    fn try_from(spec: GridSpec) -> Result<Self> {
        let grid = SpatialGrid::build(spec.bounds, spec.cell_size)?;
        if grid.columns != spec.columns || grid.rows != spec.rows {
            return Err(Error::Config(format!(
                "grid declares {}x{} cells but bounds and cell size give {}x{}",
                spec.columns, spec.rows, grid.columns, grid.rows
            )));
        }
        Ok(grid)
    }
}

impl From<SpatialGrid> for GridSpec {
    fn from(grid: SpatialGrid) -> Self {
        GridSpec {
            bounds: grid.bounds,
            cell_size: grid.cell_size,
            columns: grid.columns,
            rows: grid.rows,
        }
    }
}
