//! Offline build jobs for mosaico: cut source datasets into grid tiles and
//! build the index the query service reads.

pub mod builder;
pub mod partition;
pub mod pipeline;
pub mod raster;
pub mod source;

pub use builder::{IndexBuildSummary, MasterIndexBuilder};
pub use partition::{PartitionReport, TilePartitioner};
pub use pipeline::{partition_layer, run_build, run_index, BuildSummary, LayerFailure};
pub use raster::{read_ascii_grid, read_source_raster, RasterPartitioner};
pub use source::{read_feature_source, SourceFeatures};
