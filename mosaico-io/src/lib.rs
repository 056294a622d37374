//! Tile store I/O for mosaico
//!
//! Payload encodings (JSON vector tiles, optionally zstd-compressed, and
//! the `mrt` raster format), the store directory layout and the index
//! schema used to locate tiles without scanning directories.

pub mod hash;
pub mod index;
pub mod payload;
pub mod raster;
pub mod store;
pub mod vector;

pub use hash::content_hash;
pub use index::{
    load_master_index, CategoryIndex, LayerIndex, LayerSummary, MasterIndex, RasterMeta, TileMeta,
    INDEX_SCHEMA_VERSION,
};
pub use payload::TilePayload;
pub use raster::{RasterGrid, RasterHandle};
pub use store::{write_atomic, write_json_file, TileFile, TileFormat, TileStore};
pub use vector::{VectorTile, VECTOR_SCHEMA_VERSION};
