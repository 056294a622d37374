//! Vector layer partitioning
//!
//! Each feature goes to every cell its geometry touches, so features on a
//! cell boundary are stored in each neighbouring tile. Candidates come from
//! the feature's bounding box via grid arithmetic and are confirmed with an
//! exact geometry/box test.

use std::collections::BTreeMap;
use std::path::Path;

use mosaico_common::{LayerKind, Result, VectorCompression};
use mosaico_geometry::{
    validate_geometry, Feature, FeatureCollection, PreparedGeometry, SpatialGrid, TileId,
};
use mosaico_io::{TileFormat, TileStore, VectorTile};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::source::read_feature_source;

/// Maximum number of skip reasons kept in a report
pub const MAX_SKIP_SAMPLES: usize = 20;

/// Outcome of partitioning one layer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartitionReport {
    pub category: String,
    pub layer: String,
    pub kind: Option<LayerKind>,
    /// Records read from the source, valid or not
    pub features_read: usize,
    /// Valid features that landed in at least one tile
    pub features_assigned: usize,
    /// Feature-to-tile assignments, edge duplicates included
    pub assignments: usize,
    pub skipped: usize,
    pub skip_samples: Vec<String>,
    pub tiles_written: usize,
    pub bytes_written: u64,
}

impl PartitionReport {
    pub fn new(category: &str, layer: &str, kind: LayerKind) -> Self {
        Self {
            category: category.to_string(),
            layer: layer.to_string(),
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn record_skip(&mut self, reason: String) {
        self.skipped += 1;
        if self.skip_samples.len() < MAX_SKIP_SAMPLES {
            self.skip_samples.push(reason);
        }
    }
}

pub struct TilePartitioner {
    store: TileStore,
    grid: SpatialGrid,
    compression: VectorCompression,
}

impl TilePartitioner {
    pub fn new(store: TileStore, grid: SpatialGrid, compression: VectorCompression) -> Self {
        Self {
            store,
            grid,
            compression,
        }
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Cells whose boxes intersect the feature's geometry, ascending.
    pub fn assign(&self, geometry: &PreparedGeometry) -> Vec<TileId> {
        let Some(range) = self.grid.cell_range(geometry.bounds()) else {
            return Vec::new();
        };
        range
            .iter()
            .filter(|id| {
                self.grid
                    .cell_bounds(*id)
                    .is_some_and(|cell| geometry.intersects_box(&cell))
            })
            .collect()
    }

    /// Read a GeoJSON source and partition it.
    pub fn partition_source(&self, category: &str, layer: &str, source: &Path) -> Result<PartitionReport> {
        let read = read_feature_source(source)?;
        let mut report = PartitionReport::new(category, layer, LayerKind::Vector);
        report.features_read = read.rejected.len();
        for reason in read.rejected {
            report.record_skip(reason);
        }
        self.partition_into(report, read.features)
    }

    /// Assign features to cells and write one tile per non-empty cell,
    /// replacing whatever the layer directory held before.
    pub fn partition_layer(&self, category: &str, layer: &str, features: Vec<Feature>) -> Result<PartitionReport> {
        self.partition_into(PartitionReport::new(category, layer, LayerKind::Vector), features)
    }

    fn partition_into(&self, mut report: PartitionReport, features: Vec<Feature>) -> Result<PartitionReport> {
        let category = report.category.clone();
        let layer = report.layer.clone();
        report.features_read += features.len();

        let assigned: Vec<std::result::Result<Vec<TileId>, String>> = features
            .par_iter()
            .map(|feature| -> std::result::Result<Vec<TileId>, String> {
                validate_geometry(feature.geometry.as_ref()).map_err(|e| e.to_string())?;
                let prepared = feature
                    .geometry
                    .as_ref()
                    .and_then(PreparedGeometry::new)
                    .ok_or_else(|| "geometry has no extent".to_string())?;
                Ok(self.assign(&prepared))
            })
            .collect();

        let mut cells: BTreeMap<TileId, Vec<usize>> = BTreeMap::new();
        for (i, outcome) in assigned.into_iter().enumerate() {
            match outcome {
                Ok(ids) => {
                    if ids.is_empty() {
                        debug!(layer = %layer, feature = i, "Feature lies outside the grid");
                        continue;
                    }
                    report.features_assigned += 1;
                    report.assignments += ids.len();
                    for id in ids {
                        cells.entry(id).or_default().push(i);
                    }
                }
                Err(reason) => {
                    warn!(layer = %layer, feature = i, %reason, "Skipping invalid feature");
                    report.record_skip(format!("feature {i}: {reason}"));
                }
            }
        }

        self.store.reset_layer_dir(&category, &layer)?;

        let format = match self.compression {
            VectorCompression::None => TileFormat::Json,
            VectorCompression::Zstd => TileFormat::JsonZstd,
        };
        let sizes = cells
            .par_iter()
            .map(|(&id, members)| -> Result<u64> {
                // Ids come from the grid, so bounds always exist
                let Some(bounds) = self.grid.cell_bounds(id) else {
                    return Ok(0);
                };
                let collection =
                    FeatureCollection::new(members.iter().map(|&i| features[i].clone()).collect());
                let tile = VectorTile::new(&layer, id, bounds, collection);
                let path = self.store.tile_path(&category, &layer, id, format);
                tile.write(&path, self.compression)
            })
            .collect::<Result<Vec<u64>>>()?;

        report.tiles_written = sizes.len();
        report.bytes_written = sizes.iter().sum();

        info!(
            category = %category,
            layer = %layer,
            features = report.features_read,
            assigned = report.features_assigned,
            skipped = report.skipped,
            tiles = report.tiles_written,
            bytes = report.bytes_written,
            "Partitioned vector layer"
        );
        Ok(report)
    }
}
