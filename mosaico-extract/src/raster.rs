//! Raster layer partitioning
//!
//! A source elevation raster is cut into one `mrt` tile per grid cell. Each
//! tile's pixel window is the cell widened outward to whole pixels, so
//! neighbouring tiles share the pixels along their common edge.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use mosaico_common::{Error, LayerKind, Result};
use mosaico_geometry::{BoundingBox, GeoTransform, SpatialGrid};
use mosaico_io::{RasterGrid, TileFormat, TileStore};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::partition::PartitionReport;

const WINDOW_EPSILON: f64 = 1e-9;

/// Read an ESRI ASCII grid (`.asc`).
///
/// Supports both `xllcorner/yllcorner` and `xllcenter/yllcenter` headers and
/// an optional `NODATA_value`.
pub fn read_ascii_grid(path: &Path) -> Result<RasterGrid> {
    let reader = BufReader::new(File::open(path)?);
    let bad = |msg: String| Error::InvalidInput(format!("{}: {msg}", path.display()));

    let mut ncols = None;
    let mut nrows = None;
    let mut xll = None;
    let mut yll = None;
    let mut centered = false;
    let mut cellsize = None;
    let mut nodata = None;
    let mut data = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let first = trimmed.split_whitespace().next().unwrap_or_default();
        if first.starts_with(|c: char| c.is_ascii_alphabetic()) && data.is_empty() {
            let value = trimmed
                .split_whitespace()
                .nth(1)
                .ok_or_else(|| bad(format!("line {}: header '{first}' has no value", lineno + 1)))?;
            let number: f64 = value
                .parse()
                .map_err(|_| bad(format!("line {}: bad number '{value}'", lineno + 1)))?;
            match first.to_ascii_lowercase().as_str() {
                "ncols" => ncols = Some(number as usize),
                "nrows" => nrows = Some(number as usize),
                "xllcorner" => xll = Some(number),
                "yllcorner" => yll = Some(number),
                "xllcenter" => {
                    xll = Some(number);
                    centered = true;
                }
                "yllcenter" => {
                    yll = Some(number);
                    centered = true;
                }
                "cellsize" => cellsize = Some(number),
                "nodata_value" => nodata = Some(number as f32),
                other => return Err(bad(format!("unknown header key '{other}'"))),
            }
            continue;
        }
        for token in trimmed.split_whitespace() {
            let v: f32 = token
                .parse()
                .map_err(|_| bad(format!("line {}: bad sample '{token}'", lineno + 1)))?;
            data.push(v);
        }
    }

    let missing = |key: &str| bad(format!("missing header '{key}'"));
    let ncols = ncols.ok_or_else(|| missing("ncols"))?;
    let nrows = nrows.ok_or_else(|| missing("nrows"))?;
    let mut west = xll.ok_or_else(|| missing("xllcorner"))?;
    let mut south = yll.ok_or_else(|| missing("yllcorner"))?;
    let cellsize = cellsize.ok_or_else(|| missing("cellsize"))?;
    if !(cellsize.is_finite() && cellsize > 0.0) {
        return Err(bad(format!("cellsize must be positive, got {cellsize}")));
    }
    if centered {
        west -= cellsize / 2.0;
        south -= cellsize / 2.0;
    }
    let north = south + nrows as f64 * cellsize;

    RasterGrid::new(
        ncols,
        nrows,
        GeoTransform::north_up(west, north, cellsize, cellsize),
        nodata,
        data,
    )
    .map_err(|e| bad(e.to_string()))
}

/// Load a source raster by extension: `.asc` or `.mrt`.
pub fn read_source_raster(path: &Path) -> Result<RasterGrid> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("asc") => read_ascii_grid(path),
        Some("mrt") => RasterGrid::read(path),
        _ => Err(Error::Config(format!(
            "unsupported raster source {}, expected .asc or .mrt",
            path.display()
        ))),
    }
}

pub struct RasterPartitioner {
    store: TileStore,
    grid: SpatialGrid,
}

impl RasterPartitioner {
    pub fn new(store: TileStore, grid: SpatialGrid) -> Self {
        Self { store, grid }
    }

    pub fn partition_raster(&self, category: &str, layer: &str, source: &Path) -> Result<PartitionReport> {
        let raster = read_source_raster(source)?;
        self.partition_grid(category, layer, &raster)
    }

    /// Cut `raster` into cell-aligned tiles, replacing the layer's previous
    /// tiles. Windows holding only nodata are not written.
    pub fn partition_grid(&self, category: &str, layer: &str, raster: &RasterGrid) -> Result<PartitionReport> {
        if !raster.transform.is_north_up() {
            return Err(Error::InvalidInput(format!(
                "raster for layer '{layer}' is rotated; only north-up sources are supported"
            )));
        }
        let mut report = PartitionReport::new(category, layer, LayerKind::Raster);
        self.store.reset_layer_dir(category, layer)?;

        let written = self
            .grid
            .cells()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|cell| -> Result<Option<u64>> {
                let Some(window) = cell_window(raster, &cell.bounds) else {
                    return Ok(None);
                };
                if window.all_nodata() {
                    debug!(layer, tile = %cell.id, "Skipping all-nodata window");
                    return Ok(None);
                }
                let path = self.store.tile_path(category, layer, cell.id, TileFormat::Mrt);
                window.write(&path).map(Some)
            })
            .collect::<Result<Vec<Option<u64>>>>()?;

        for size in written.into_iter().flatten() {
            report.tiles_written += 1;
            report.bytes_written += size;
        }
        info!(
            category,
            layer,
            width = raster.width,
            height = raster.height,
            tiles = report.tiles_written,
            bytes = report.bytes_written,
            "Partitioned raster layer"
        );
        Ok(report)
    }
}

/// Pixel window covering a cell, widened outward to whole pixels.
fn cell_window(raster: &RasterGrid, cell: &BoundingBox) -> Option<RasterGrid> {
    let t = &raster.transform;
    let (c0, r0) = t.geo_to_pixel_f64(cell.north(), cell.west())?;
    let (c1, r1) = t.geo_to_pixel_f64(cell.south(), cell.east())?;

    let col_start = (c0 - WINDOW_EPSILON).floor().max(0.0);
    let row_start = (r0 - WINDOW_EPSILON).floor().max(0.0);
    let col_end = (c1 + WINDOW_EPSILON).ceil().min(raster.width as f64);
    let row_end = (r1 + WINDOW_EPSILON).ceil().min(raster.height as f64);
    if col_end <= col_start || row_end <= row_start {
        return None;
    }
    raster.window(
        row_start as usize,
        col_start as usize,
        (row_end - row_start) as usize,
        (col_end - col_start) as usize,
    )
}
