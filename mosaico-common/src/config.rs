//! TOML configuration for dataset builds and the tile service
//!
//! A single `mosaico.toml` carries both halves: `[dataset]` is consumed by
//! the offline partition/index jobs, `[serve]` by the query service. Relative
//! paths are resolved against the directory containing the config file.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Region bounds as written in configuration files.
///
/// Validated and converted into a geometry bounding box by the geometry crate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

/// Whether a layer holds features or elevation samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Vector,
    Raster,
}

/// On-disk encoding for vector tile payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorCompression {
    #[default]
    None,
    Zstd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub kind: LayerKind,
    /// Source dataset (GeoJSON for vector layers, `.asc`/`.mrt` for rasters)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
}

/// Build-time inputs: grid definition and the layers to partition and index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Root directory of the tile store
    pub store: PathBuf,
    /// Grid cell size in decimal degrees
    pub cell_size: f64,
    pub bounds: RegionBounds,
    #[serde(default)]
    pub vector_compression: VectorCompression,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

/// Raster sampling mode for elevation lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sampling {
    /// Read the pixel containing the point
    #[default]
    Nearest,
    /// Interpolate between the four surrounding pixel centers
    Bilinear,
}

/// What a batch reports for points without raster coverage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Use the procedural estimate
    #[default]
    Procedural,
    /// Report `null`
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub elevation_layer: String,
    /// Entries kept by the cross-request tile cache; 0 disables it
    pub shared_cache_capacity: usize,
    pub sampling: Sampling,
    pub fallback: FallbackPolicy,
    pub max_batch_points: usize,
    pub max_query_layers: usize,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            elevation_layer: "elevacion".to_string(),
            shared_cache_capacity: 0,
            sampling: Sampling::Nearest,
            fallback: FallbackPolicy::Procedural,
            max_batch_points: 10_000,
            max_query_layers: 32,
        }
    }
}

/// Top-level `mosaico.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicoConfig {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub serve: ServeConfig,
}

impl MosaicoConfig {
    /// Parse a TOML document without touching the filesystem.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MosaicoConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, validate, and resolve relative paths against the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &Path| -> PathBuf {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        self.dataset.store = resolve(&self.dataset.store);
        for category in &mut self.dataset.categories {
            for layer in &mut category.layers {
                if let Some(source) = layer.source.as_deref() {
                    layer.source = Some(resolve(source));
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.dataset.validate()?;
        if self.serve.max_batch_points == 0 || self.serve.max_query_layers == 0 {
            return Err(Error::Config(
                "serve limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(Error::Config(format!(
                "cell_size must be a positive number of degrees, got {}",
                self.cell_size
            )));
        }
        let b = self.bounds;
        if [b.north, b.south, b.east, b.west].iter().any(|v| !v.is_finite()) {
            return Err(Error::Config("bounds must be finite".to_string()));
        }
        if b.north <= b.south || b.east <= b.west {
            return Err(Error::Config(format!(
                "bounds must satisfy north > south and east > west, got {b:?}"
            )));
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            check_name("category", &category.name)?;
            for layer in &category.layers {
                check_name("layer", &layer.name)?;
                if !seen.insert(layer.name.as_str()) {
                    return Err(Error::Config(format!(
                        "layer '{}' is declared more than once",
                        layer.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Iterate `(category, layer)` pairs in declaration order.
    pub fn layers(&self) -> impl Iterator<Item = (&CategoryConfig, &LayerConfig)> {
        self.categories
            .iter()
            .flat_map(|c| c.layers.iter().map(move |l| (c, l)))
    }

    /// Find a layer by name along with its category.
    pub fn layer(&self, name: &str) -> Option<(&CategoryConfig, &LayerConfig)> {
        self.layers().find(|(_, l)| l.name == name)
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers().map(|(_, l)| l.name.clone()).collect()
    }
}

/// Names become directory names in the tile store.
fn check_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name == "index.json"
    {
        return Err(Error::Config(format!("invalid {what} name '{name}'")));
    }
    Ok(())
}
