//! Vector tile payloads
//!
//! A vector tile is a JSON document holding the features assigned to one
//! grid cell, optionally zstd-compressed.

use std::fs;
use std::path::Path;

use mosaico_common::{Error, Result, VectorCompression};
use mosaico_geometry::{BoundingBox, FeatureCollection, TileId};
use serde::{Deserialize, Serialize};

use crate::store::{write_atomic, TileFormat};

/// Highest vector tile schema this build reads and the one it writes
pub const VECTOR_SCHEMA_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorTile {
    pub schema_version: u32,
    pub layer: String,
    pub tile_id: TileId,
    pub bounds: BoundingBox,
    pub features: FeatureCollection,
}

impl VectorTile {
    pub fn new(layer: &str, tile_id: TileId, bounds: BoundingBox, features: FeatureCollection) -> Self {
        Self {
            schema_version: VECTOR_SCHEMA_VERSION,
            layer: layer.to_string(),
            tile_id,
            bounds,
            features,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn encode(&self, compression: VectorCompression) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        match compression {
            VectorCompression::None => Ok(json),
            VectorCompression::Zstd => Ok(zstd::encode_all(&json[..], ZSTD_LEVEL)?),
        }
    }

    /// Write to `path`, returning the number of bytes on disk.
    pub fn write(&self, path: &Path, compression: VectorCompression) -> Result<u64> {
        let bytes = self.encode(compression)?;
        write_atomic(path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    pub fn decode(path: &Path, bytes: &[u8], format: TileFormat) -> Result<Self> {
        let json = match format {
            TileFormat::Json => std::borrow::Cow::Borrowed(bytes),
            TileFormat::JsonZstd => std::borrow::Cow::Owned(
                zstd::decode_all(bytes).map_err(|e| Error::corrupt(path, format!("zstd: {e}")))?,
            ),
            TileFormat::Mrt => {
                return Err(Error::corrupt(path, "raster file read as vector tile"));
            }
        };
        let tile: VectorTile =
            serde_json::from_slice(&json).map_err(|e| Error::corrupt(path, e.to_string()))?;
        if tile.schema_version > VECTOR_SCHEMA_VERSION {
            return Err(Error::UnsupportedSchema {
                found: tile.schema_version,
                supported: VECTOR_SCHEMA_VERSION,
            });
        }
        Ok(tile)
    }

    pub fn read(path: &Path, format: TileFormat) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::decode(path, &bytes, format)
    }
}
