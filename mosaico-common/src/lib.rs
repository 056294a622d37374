//! Common utilities for the mosaico tile engine

pub mod config;
pub mod error;

pub use config::{
    CategoryConfig, DatasetConfig, FallbackPolicy, LayerConfig, LayerKind, MosaicoConfig,
    RegionBounds, Sampling, ServeConfig, VectorCompression,
};
pub use error::{suggest_layer, Error, Result};
