//! Dataset build pipeline
//!
//! Partitions every configured layer in parallel, each in isolation, then
//! rebuilds the index from whatever the store now holds. A layer that fails
//! keeps its previous tiles (or none) and is reported; it never stops the
//! other layers or the index build.

use mosaico_common::{DatasetConfig, Error, LayerConfig, LayerKind, Result};
use mosaico_geometry::{BoundingBox, SpatialGrid};
use mosaico_io::{MasterIndex, TileStore};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::builder::{IndexBuildSummary, MasterIndexBuilder};
use crate::partition::{PartitionReport, TilePartitioner};
use crate::raster::RasterPartitioner;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerFailure {
    pub layer: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub reports: Vec<PartitionReport>,
    pub failures: Vec<LayerFailure>,
    /// Layers without a configured source, left untouched
    pub unsourced: Vec<String>,
    pub index: IndexBuildSummary,
}

fn dataset_grid(config: &DatasetConfig) -> Result<SpatialGrid> {
    let bounds: BoundingBox = config.bounds.try_into()?;
    SpatialGrid::build(bounds, config.cell_size)
}

/// Partition a single layer from its configured source.
pub fn partition_layer(config: &DatasetConfig, layer_name: &str) -> Result<PartitionReport> {
    let (category, layer) = config
        .layer(layer_name)
        .ok_or_else(|| Error::layer_not_found(layer_name, &config.layer_names()))?;
    let grid = dataset_grid(config)?;
    partition_configured(config, grid, &category.name, layer)
}

fn partition_configured(
    config: &DatasetConfig,
    grid: SpatialGrid,
    category: &str,
    layer: &LayerConfig,
) -> Result<PartitionReport> {
    let source = layer.source.as_deref().ok_or_else(|| {
        Error::Config(format!("layer '{}' has no source configured", layer.name))
    })?;
    let store = TileStore::new(&config.store);
    match layer.kind {
        LayerKind::Vector => TilePartitioner::new(store, grid, config.vector_compression)
            .partition_source(category, &layer.name, source),
        LayerKind::Raster => {
            RasterPartitioner::new(store, grid).partition_raster(category, &layer.name, source)
        }
    }
}

/// Rebuild and write the index only.
pub fn run_index(config: &DatasetConfig) -> Result<(MasterIndex, IndexBuildSummary)> {
    MasterIndexBuilder::new(config)?.build_and_write()
}

/// Partition every sourced layer, then rebuild the index.
pub fn run_build(config: &DatasetConfig) -> Result<BuildSummary> {
    let grid = dataset_grid(config)?;
    std::fs::create_dir_all(&config.store)?;

    let layers: Vec<_> = config.layers().collect();
    let unsourced: Vec<String> = layers
        .iter()
        .filter(|(_, l)| l.source.is_none())
        .map(|(_, l)| l.name.clone())
        .collect();
    for name in &unsourced {
        warn!(layer = %name, "No source configured, keeping existing tiles");
    }

    info!(
        layers = layers.len() - unsourced.len(),
        cells = grid.cell_count(),
        "Partitioning layers"
    );
    let outcomes: Vec<(String, Result<PartitionReport>)> = layers
        .par_iter()
        .filter(|(_, l)| l.source.is_some())
        .map(|(category, layer)| {
            let outcome = partition_configured(config, grid.clone(), &category.name, layer);
            (layer.name.clone(), outcome)
        })
        .collect();

    let mut reports = Vec::new();
    let mut failures = Vec::new();
    for (layer, outcome) in outcomes {
        match outcome {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(layer = %layer, error = %e, "Layer partitioning failed");
                failures.push(LayerFailure {
                    layer,
                    error: e.to_string(),
                });
            }
        }
    }

    let (_, index) = run_index(config)?;
    Ok(BuildSummary {
        reports,
        failures,
        unsourced,
        index,
    })
}
