//! Small on-disk dataset shared by the unit tests of this crate.
//!
//! 2x2 grid of one-degree cells over N0 S-2 E2 W0:
//! - `rios`: a line across the two northern cells (id 1) and a point in
//!   c0000_r0001 (id 2)
//! - `lagos`: declared but never partitioned
//! - `elevacion`: raster over the western column only, 0.25 degree pixels,
//!   value `row * 10 + col`, pixel (0, 0) is nodata

use mosaico_common::{CategoryConfig, DatasetConfig, LayerConfig, LayerKind, RegionBounds, VectorCompression};
use mosaico_extract::{run_index, RasterPartitioner, TilePartitioner};
use mosaico_geometry::{BoundingBox, Feature, FeatureId, GeoTransform, Geometry, Position, SpatialGrid};
use mosaico_io::{RasterGrid, TileStore};
use tempfile::TempDir;

use crate::cache::TileCache;

pub const NODATA: f32 = -9999.0;

pub fn config(store: &std::path::Path) -> DatasetConfig {
    let layer = |name: &str, kind| LayerConfig {
        name: name.to_string(),
        kind,
        source: None,
    };
    DatasetConfig {
        store: store.to_path_buf(),
        cell_size: 1.0,
        bounds: RegionBounds {
            north: 0.0,
            south: -2.0,
            east: 2.0,
            west: 0.0,
        },
        vector_compression: VectorCompression::Zstd,
        categories: vec![
            CategoryConfig {
                name: "Hidrografia".to_string(),
                layers: vec![layer("rios", LayerKind::Vector), layer("lagos", LayerKind::Vector)],
            },
            CategoryConfig {
                name: "Relieve".to_string(),
                layers: vec![layer("elevacion", LayerKind::Raster)],
            },
        ],
    }
}

/// Source raster for `elevacion`.
pub fn dem() -> RasterGrid {
    let (width, height) = (4, 8);
    let mut data: Vec<f32> = (0..height)
        .flat_map(|r| (0..width).map(move |c| (r * 10 + c) as f32))
        .collect();
    data[0] = NODATA;
    RasterGrid::new(
        width,
        height,
        GeoTransform::north_up(0.0, 0.0, 0.25, 0.25),
        Some(NODATA),
        data,
    )
    .unwrap()
}

pub fn rios() -> Vec<Feature> {
    vec![
        Feature::new(Geometry::LineString(vec![
            Position::new(0.5, -0.5),
            Position::new(1.5, -0.5),
        ]))
        .with_id(FeatureId::Number(1))
        .with_property("nombre", "Arroyo del Medio"),
        Feature::new(Geometry::Point(Position::new(0.2, -1.2)))
            .with_id(FeatureId::Number(2))
            .with_property("nombre", "Vertiente"),
    ]
}

/// Partition all layers and write the index.
pub fn build() -> (TempDir, DatasetConfig) {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir.path().join("tiles"));
    let store = TileStore::new(&cfg.store);
    let grid = SpatialGrid::build(BoundingBox::try_from(cfg.bounds).unwrap(), cfg.cell_size).unwrap();

    TilePartitioner::new(store.clone(), grid.clone(), cfg.vector_compression)
        .partition_layer("Hidrografia", "rios", rios())
        .unwrap();
    RasterPartitioner::new(store, grid)
        .partition_grid("Relieve", "elevacion", &dem())
        .unwrap();
    run_index(&cfg).unwrap();
    (dir, cfg)
}

pub fn cache() -> (TempDir, TileCache) {
    let (dir, cfg) = build();
    let cache = TileCache::open(&cfg.store).unwrap();
    (dir, cache)
}
