//! Master index construction
//!
//! Walks the tile store (never the source data) and rebuilds every index
//! file from the payloads actually present. Output is fully determined by
//! the store contents: ordered maps, no timestamps.

use std::collections::BTreeMap;

use mosaico_common::{DatasetConfig, Error, LayerKind, Result};
use mosaico_geometry::{BoundingBox, SpatialGrid, TileId};
use mosaico_io::{
    content_hash, LayerIndex, MasterIndex, RasterHandle, RasterMeta, TileFile, TileFormat,
    TileMeta, TileStore, VectorTile,
};
use serde::Serialize;
use tracing::{info, warn};

/// Counters from one index build
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexBuildSummary {
    pub layers: usize,
    pub tiles_indexed: u64,
    pub features_indexed: u64,
    /// Payload files left out because they could not be read
    pub tiles_skipped: u64,
    /// Configured layers with no directory in the store
    pub missing_layers: Vec<String>,
}

pub struct MasterIndexBuilder {
    store: TileStore,
    grid: SpatialGrid,
    layers: Vec<(String, String, LayerKind)>,
}

impl MasterIndexBuilder {
    pub fn new(config: &DatasetConfig) -> Result<Self> {
        let bounds: BoundingBox = config.bounds.try_into()?;
        let grid = SpatialGrid::build(bounds, config.cell_size)?;
        let layers = config
            .layers()
            .map(|(c, l)| (c.name.clone(), l.name.clone(), l.kind))
            .collect();
        Ok(Self {
            store: TileStore::new(&config.store),
            grid,
            layers,
        })
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    /// Compute the index from the store contents.
    pub fn build(&self) -> Result<(MasterIndex, IndexBuildSummary)> {
        let mut summary = IndexBuildSummary::default();
        let mut layers = BTreeMap::new();

        for (category, layer, kind) in &self.layers {
            let index = match self.store.list_tiles(category, layer)? {
                None => {
                    warn!(category = %category, layer = %layer, "Layer directory missing, indexing as empty");
                    summary.missing_layers.push(layer.clone());
                    LayerIndex::empty(category, *kind, self.grid.clone())
                }
                Some(files) => {
                    let mut tiles = BTreeMap::new();
                    for file in files {
                        match self.tile_meta(layer, *kind, &file) {
                            Ok(meta) => {
                                tiles.insert(file.tile_id, meta);
                            }
                            Err(e) => {
                                warn!(
                                    layer = %layer,
                                    path = %file.path.display(),
                                    error = %e,
                                    "Leaving unreadable tile out of the index"
                                );
                                summary.tiles_skipped += 1;
                            }
                        }
                    }
                    LayerIndex::from_tiles(category, *kind, self.grid.clone(), tiles)
                }
            };
            summary.tiles_indexed += index.tile_count;
            summary.features_indexed += index.feature_count;
            layers.insert(layer.clone(), index);
        }
        summary.layers = layers.len();

        let index = MasterIndex::assemble(*self.grid.bounds(), self.grid.cell_size(), layers);
        Ok((index, summary))
    }

    /// Build and write all index files.
    pub fn build_and_write(&self) -> Result<(MasterIndex, IndexBuildSummary)> {
        let (index, summary) = self.build()?;
        index.write(&self.store)?;
        info!(
            store = %self.store.root().display(),
            layers = summary.layers,
            tiles = summary.tiles_indexed,
            features = summary.features_indexed,
            skipped = summary.tiles_skipped,
            "Wrote master index"
        );
        Ok((index, summary))
    }

    fn tile_meta(&self, layer: &str, kind: LayerKind, file: &TileFile) -> Result<TileMeta> {
        let bounds = self.cell_bounds(file.tile_id)?;
        let bytes = std::fs::read(&file.path)?;
        let hash = content_hash(&bytes);

        let (feature_count, raster) = match (kind, file.format) {
            (LayerKind::Vector, TileFormat::Json | TileFormat::JsonZstd) => {
                let tile = VectorTile::decode(&file.path, &bytes, file.format)?;
                if tile.layer != layer || tile.tile_id != file.tile_id {
                    return Err(Error::corrupt(
                        &file.path,
                        format!("payload is {}/{}", tile.layer, tile.tile_id),
                    ));
                }
                (tile.feature_count() as u64, None)
            }
            (LayerKind::Raster, TileFormat::Mrt) => {
                let handle = RasterHandle::open(&file.path)?;
                let meta = RasterMeta {
                    width: handle.width() as u32,
                    height: handle.height() as u32,
                };
                (0, Some(meta))
            }
            (kind, format) => {
                return Err(Error::corrupt(
                    &file.path,
                    format!("{format:?} payload in a {kind:?} layer"),
                ));
            }
        };

        Ok(TileMeta {
            bounds,
            format: file.format,
            feature_count,
            size_bytes: bytes.len() as u64,
            content_hash: hash,
            raster,
        })
    }

    fn cell_bounds(&self, id: TileId) -> Result<BoundingBox> {
        self.grid.cell_bounds(id).ok_or_else(|| {
            Error::InvalidInput(format!(
                "tile {id} is outside the {}x{} grid",
                self.grid.columns(),
                self.grid.rows()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaico_common::{CategoryConfig, LayerConfig, RegionBounds, VectorCompression};
    use mosaico_geometry::{Feature, Geometry, Position};

    use crate::partition::TilePartitioner;

    fn config(store: &std::path::Path) -> DatasetConfig {
        DatasetConfig {
            store: store.to_path_buf(),
            cell_size: 1.0,
            bounds: RegionBounds {
                north: 0.0,
                south: -2.0,
                east: 2.0,
                west: 0.0,
            },
            vector_compression: VectorCompression::None,
            categories: vec![
                CategoryConfig {
                    name: "Transporte".to_string(),
                    layers: vec![LayerConfig {
                        name: "ruta".to_string(),
                        kind: LayerKind::Vector,
                        source: None,
                    }],
                },
                CategoryConfig {
                    name: "Hidrografia".to_string(),
                    layers: vec![LayerConfig {
                        name: "rios".to_string(),
                        kind: LayerKind::Vector,
                        source: None,
                    }],
                },
            ],
        }
    }

    fn populate(cfg: &DatasetConfig) {
        let builder = MasterIndexBuilder::new(cfg).unwrap();
        let partitioner = TilePartitioner::new(
            builder.store().clone(),
            builder.grid.clone(),
            VectorCompression::None,
        );
        let features = vec![
            Feature::new(Geometry::LineString(vec![
                Position::new(0.5, -0.5),
                Position::new(1.5, -0.5),
            ])),
            Feature::new(Geometry::Point(Position::new(0.2, -1.2))),
        ];
        partitioner
            .partition_layer("Transporte", "ruta", features)
            .unwrap();
    }

    #[test]
    fn test_build_counts_and_missing_layer() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        populate(&cfg);

        let (index, summary) = MasterIndexBuilder::new(&cfg).unwrap().build().unwrap();
        let ruta = index.layer("ruta").unwrap();
        assert_eq!(ruta.tile_count, 3);
        assert_eq!(ruta.feature_count, 3);
        assert_eq!(
            ruta.bounds,
            Some(BoundingBox::new(0.0, -2.0, 2.0, 0.0).unwrap())
        );

        let rios = index.layer("rios").unwrap();
        assert_eq!(rios.tile_count, 0);
        assert_eq!(rios.bounds, None);
        assert_eq!(summary.missing_layers, vec!["rios".to_string()]);
        assert_eq!(index.total_tiles, 3);
        assert_eq!(index.categories["Hidrografia"].tile_count, 0);
    }

    #[test]
    fn test_rebuild_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        populate(&cfg);

        let builder = MasterIndexBuilder::new(&cfg).unwrap();
        builder.build_and_write().unwrap();
        let store = builder.store();
        let first_master = std::fs::read(store.master_index_path()).unwrap();
        let first_layer = std::fs::read(store.layer_index_path("Transporte", "ruta")).unwrap();

        builder.build_and_write().unwrap();
        assert_eq!(first_master, std::fs::read(store.master_index_path()).unwrap());
        assert_eq!(
            first_layer,
            std::fs::read(store.layer_index_path("Transporte", "ruta")).unwrap()
        );
    }

    #[test]
    fn test_unreadable_tile_is_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        populate(&cfg);
        std::fs::write(dir.path().join("Transporte/ruta/c0001_r0001.json"), b"{ nope").unwrap();

        let (index, summary) = MasterIndexBuilder::new(&cfg).unwrap().build().unwrap();
        assert_eq!(summary.tiles_skipped, 1);
        assert_eq!(index.layer("ruta").unwrap().tile_count, 3);
        assert!(!index.layer("ruta").unwrap().tiles.contains_key(&TileId::new(1, 1)));
    }

    #[test]
    fn test_content_hash_tracks_payload() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        populate(&cfg);
        let builder = MasterIndexBuilder::new(&cfg).unwrap();
        let (before, _) = builder.build().unwrap();

        let partitioner = TilePartitioner::new(
            builder.store().clone(),
            builder.grid.clone(),
            VectorCompression::None,
        );
        partitioner
            .partition_layer(
                "Transporte",
                "ruta",
                vec![Feature::new(Geometry::Point(Position::new(0.3, -0.3)))],
            )
            .unwrap();
        let (after, _) = builder.build().unwrap();

        let id = TileId::new(0, 0);
        assert_ne!(
            before.layers["ruta"].tiles[&id].content_hash,
            after.layers["ruta"].tiles[&id].content_hash
        );
    }
}
