//! Master, category and layer index schema
//!
//! The index is the only thing the query path consults to find tiles: the
//! per-layer grid turns a region into a candidate cell range and the tile
//! map says which of those cells have a payload. All maps are `BTreeMap`s
//! so serialized output is ordered and stable across rebuilds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mosaico_common::{Error, LayerKind, Result};
use mosaico_geometry::{BoundingBox, SpatialGrid, TileId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::{write_json_file, TileFormat, TileStore};

/// Highest index schema this build reads and the one it writes
pub const INDEX_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterMeta {
    pub width: u32,
    pub height: u32,
}

/// Metadata for one payload file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMeta {
    pub bounds: BoundingBox,
    pub format: TileFormat,
    /// Features in a vector tile; 0 for rasters
    pub feature_count: u64,
    pub size_bytes: u64,
    /// xxh3-64 of the payload file
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raster: Option<RasterMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerIndex {
    pub category: String,
    pub kind: LayerKind,
    pub tile_count: u64,
    pub feature_count: u64,
    /// Union of tile boxes; absent for a layer without tiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
    pub grid: SpatialGrid,
    pub tiles: BTreeMap<TileId, TileMeta>,
}

/// Per-layer totals without the tile map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub category: String,
    pub kind: LayerKind,
    pub tile_count: u64,
    pub feature_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryIndex {
    pub tile_count: u64,
    pub feature_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
    pub layers: BTreeMap<String, LayerSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterIndex {
    pub schema_version: u32,
    pub bounds: BoundingBox,
    pub cell_size: f64,
    pub total_tiles: u64,
    pub total_features: u64,
    pub categories: BTreeMap<String, CategoryIndex>,
    pub layers: BTreeMap<String, LayerIndex>,
}

impl LayerIndex {
    /// Layer with no tiles, e.g. one whose directory was never written.
    pub fn empty(category: &str, kind: LayerKind, grid: SpatialGrid) -> Self {
        Self {
            category: category.to_string(),
            kind,
            tile_count: 0,
            feature_count: 0,
            bounds: None,
            grid,
            tiles: BTreeMap::new(),
        }
    }

    /// Build from a tile map, deriving counts and bounds.
    pub fn from_tiles(
        category: &str,
        kind: LayerKind,
        grid: SpatialGrid,
        tiles: BTreeMap<TileId, TileMeta>,
    ) -> Self {
        Self {
            category: category.to_string(),
            kind,
            tile_count: tiles.len() as u64,
            feature_count: tiles.values().map(|t| t.feature_count).sum(),
            bounds: BoundingBox::union_all(tiles.values().map(|t| &t.bounds)),
            grid,
            tiles,
        }
    }

    /// Tiles whose boxes intersect `region`, ascending by id.
    ///
    /// Candidates come from grid arithmetic; only those present in the tile
    /// map and whose stored bounds intersect are returned.
    pub fn resolve(&self, region: &BoundingBox) -> Vec<TileId> {
        let Some(range) = self.grid.cell_range(region) else {
            return Vec::new();
        };
        let in_range = |id: &TileId| {
            (range.col_min..=range.col_max).contains(&id.column)
                && (range.row_min..=range.row_max).contains(&id.row)
        };

        // Sparse layers: walking the map beats probing every candidate cell
        if range.len() > self.tiles.len() {
            return self
                .tiles
                .iter()
                .filter(|(id, meta)| in_range(id) && meta.bounds.intersects(region))
                .map(|(id, _)| *id)
                .collect();
        }
        range
            .iter()
            .filter(|id| {
                self.tiles
                    .get(id)
                    .is_some_and(|meta| meta.bounds.intersects(region))
            })
            .collect()
    }

    pub fn summary(&self) -> LayerSummary {
        LayerSummary {
            category: self.category.clone(),
            kind: self.kind,
            tile_count: self.tile_count,
            feature_count: self.feature_count,
            bounds: self.bounds,
        }
    }
}

impl CategoryIndex {
    pub fn from_layers<'a, I>(layers: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a LayerIndex)>,
    {
        let layers: BTreeMap<String, LayerSummary> = layers
            .into_iter()
            .map(|(name, layer)| (name.clone(), layer.summary()))
            .collect();
        Self {
            tile_count: layers.values().map(|l| l.tile_count).sum(),
            feature_count: layers.values().map(|l| l.feature_count).sum(),
            bounds: BoundingBox::union_all(layers.values().filter_map(|l| l.bounds.as_ref())),
            layers,
        }
    }
}

impl MasterIndex {
    /// Aggregate layer indexes into categories and global totals.
    pub fn assemble(bounds: BoundingBox, cell_size: f64, layers: BTreeMap<String, LayerIndex>) -> Self {
        let mut by_category: BTreeMap<&str, Vec<(&String, &LayerIndex)>> = BTreeMap::new();
        for (name, layer) in &layers {
            by_category
                .entry(layer.category.as_str())
                .or_default()
                .push((name, layer));
        }
        let categories: BTreeMap<String, CategoryIndex> = by_category
            .into_iter()
            .map(|(name, members)| (name.to_string(), CategoryIndex::from_layers(members)))
            .collect();

        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            bounds,
            cell_size,
            total_tiles: categories.values().map(|c| c.tile_count).sum(),
            total_features: categories.values().map(|c| c.feature_count).sum(),
            categories,
            layers,
        }
    }

    /// Read and check a master index file.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::IndexMissing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let index: MasterIndex = serde_json::from_slice(&bytes)?;
        if index.schema_version > INDEX_SCHEMA_VERSION {
            return Err(Error::UnsupportedSchema {
                found: index.schema_version,
                supported: INDEX_SCHEMA_VERSION,
            });
        }
        debug!(
            path = %path.display(),
            layers = index.layers.len(),
            tiles = index.total_tiles,
            "Loaded master index"
        );
        Ok(index)
    }

    /// Write master, category and layer index files into the store.
    pub fn write(&self, store: &TileStore) -> Result<()> {
        for (name, layer) in &self.layers {
            write_json_file(&store.layer_index_path(&layer.category, name), layer)?;
        }
        for (name, category) in &self.categories {
            write_json_file(&store.category_index_path(name), category)?;
        }
        write_json_file(&store.master_index_path(), self)
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers.keys().cloned().collect()
    }

    /// Look up a layer, suggesting a close name when it is unknown.
    pub fn layer(&self, name: &str) -> Result<&LayerIndex> {
        self.layers
            .get(name)
            .ok_or_else(|| Error::layer_not_found(name, &self.layer_names()))
    }

    /// Tiles of `layer` intersecting `region`; unknown layers resolve to
    /// nothing.
    pub fn resolve(&self, region: &BoundingBox, layer: &str) -> Vec<TileId> {
        self.layers
            .get(layer)
            .map(|l| l.resolve(region))
            .unwrap_or_default()
    }

    /// Location and metadata of an indexed tile.
    pub fn tile(&self, store: &TileStore, layer: &str, tile_id: TileId) -> Result<(PathBuf, &TileMeta)> {
        let index = self.layer(layer)?;
        let meta = index.tiles.get(&tile_id).ok_or_else(|| Error::TileNotFound {
            layer: layer.to_string(),
            tile_id: tile_id.to_string(),
        })?;
        Ok((store.tile_path(&index.category, layer, tile_id, meta.format), meta))
    }
}

/// Open the store at `root` and read its master index.
pub fn load_master_index(root: &Path) -> Result<(TileStore, MasterIndex)> {
    let store = TileStore::open(root)?;
    let index = MasterIndex::read(&store.master_index_path())?;
    Ok((store, index))
}
