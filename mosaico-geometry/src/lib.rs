//! Geometry primitives for the mosaico tile engine
//!
//! Everything here is pure computation: axis-aligned boxes, the fixed-size
//! cell grid that tiles are cut from, GeoJSON-compatible feature types and
//! the affine transform that maps coordinates to raster pixels.

pub mod bbox;
pub mod feature;
pub mod grid;
pub mod tile_id;
pub mod transform;
pub mod validate;

pub use bbox::BoundingBox;
pub use feature::{Feature, FeatureCollection, FeatureId, Geometry, Position, PreparedGeometry};
pub use grid::{CellRange, GridCell, SpatialGrid};
pub use tile_id::TileId;
pub use transform::GeoTransform;
pub use validate::{validate_geometry, GeometryError};
