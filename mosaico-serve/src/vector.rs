//! Viewport queries over vector layers
//!
//! Features are returned tile by tile in ascending tile id order. A feature
//! crossing a tile boundary is stored in every tile it touches and is
//! therefore returned once per tile unless [`QueryOptions::dedupe_by_id`]
//! is set. Features without an id are never deduplicated.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use mosaico_common::LayerKind;
use mosaico_geometry::{BoundingBox, FeatureCollection, FeatureId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::cache::{TileCache, TileScope};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Drop repeated features that carry the same id
    #[serde(default)]
    pub dedupe_by_id: bool,
}

/// A tile left out of a result because it failed to load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SkippedTile {
    pub layer: String,
    pub tile_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VectorQueryResult {
    /// One entry per requested layer, empty when nothing intersects
    pub layers: BTreeMap<String, FeatureCollection>,
    pub tiles_loaded: usize,
    pub features_total: usize,
    pub skipped_tiles: Vec<SkippedTile>,
}

pub struct VectorQueryService {
    cache: Arc<TileCache>,
}

impl VectorQueryService {
    pub fn new(cache: Arc<TileCache>) -> Self {
        Self { cache }
    }

    /// Features of each layer from the tiles intersecting `bbox`.
    pub fn query(&self, bbox: &BoundingBox, layers: &[String], options: QueryOptions) -> VectorQueryResult {
        let mut result = VectorQueryResult::default();
        let mut scope = self.cache.scope();

        for name in layers {
            if result.layers.contains_key(name) {
                continue;
            }
            let collection = self.query_layer(&mut scope, bbox, name, options, &mut result.skipped_tiles);
            result.features_total += collection.len();
            result.layers.insert(name.clone(), collection);
        }

        result.tiles_loaded = scope.len();
        scope.release();
        debug!(
            layers = result.layers.len(),
            tiles = result.tiles_loaded,
            features = result.features_total,
            skipped = result.skipped_tiles.len(),
            "Vector query done"
        );
        result
    }

    fn query_layer(
        &self,
        scope: &mut TileScope<'_>,
        bbox: &BoundingBox,
        name: &str,
        options: QueryOptions,
        skipped: &mut Vec<SkippedTile>,
    ) -> FeatureCollection {
        let mut collection = FeatureCollection::default();
        match self.cache.index().layers.get(name) {
            None => {
                debug!(layer = name, "Unknown layer in query");
                return collection;
            }
            Some(layer) if layer.kind == LayerKind::Raster => {
                warn!(layer = name, "Raster layer requested in a vector query");
                return collection;
            }
            Some(_) => {}
        }

        let mut seen: HashSet<FeatureId> = HashSet::new();
        for tile_id in self.cache.resolve(bbox, name) {
            let payload = match scope.load(name, tile_id) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(layer = name, tile = %tile_id, error = %e, "Skipping unreadable tile");
                    skipped.push(SkippedTile {
                        layer: name.to_string(),
                        tile_id: tile_id.to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let Some(tile) = payload.as_vector() else {
                continue;
            };
            let features = tile.features.features.iter().filter(|f| {
                match (&f.id, options.dedupe_by_id) {
                    (Some(id), true) => seen.insert(id.clone()),
                    _ => true,
                }
            });
            collection.extend(features.cloned());
        }
        collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture;
    use tempfile::TempDir;

    fn service() -> (TempDir, VectorQueryService) {
        let (dir, cache) = fixture::cache();
        (dir, VectorQueryService::new(Arc::new(cache)))
    }

    fn names(layers: &[&str]) -> Vec<String> {
        layers.iter().map(|s| s.to_string()).collect()
    }

    fn ids(collection: &FeatureCollection) -> Vec<FeatureId> {
        collection
            .features
            .iter()
            .filter_map(|f| f.id.clone())
            .collect()
    }

    #[test]
    fn test_adjacent_tiles_return_duplicates() {
        let (_dir, svc) = service();
        let bbox = BoundingBox::region(-0.2, -0.8, 1.8, 0.2).unwrap();
        let result = svc.query(&bbox, &names(&["rios"]), QueryOptions::default());

        let rios = &result.layers["rios"];
        assert_eq!(ids(rios), vec![FeatureId::Number(1), FeatureId::Number(1)]);
        assert_eq!(result.tiles_loaded, 2);
        assert_eq!(result.features_total, 2);
        assert!(result.skipped_tiles.is_empty());
    }

    #[test]
    fn test_dedupe_by_id() {
        let (_dir, svc) = service();
        let bbox = BoundingBox::region(-0.2, -1.8, 1.8, 0.1).unwrap();
        let result = svc.query(&bbox, &names(&["rios"]), QueryOptions { dedupe_by_id: true });
        assert_eq!(
            ids(&result.layers["rios"]),
            vec![FeatureId::Number(1), FeatureId::Number(2)]
        );
        assert_eq!(result.tiles_loaded, 3);
    }

    #[test]
    fn test_empty_unknown_and_raster_layers() {
        let (_dir, svc) = service();
        let bbox = BoundingBox::region(-0.2, -0.8, 1.8, 0.2).unwrap();
        let result = svc.query(
            &bbox,
            &names(&["lagos", "nope", "elevacion", "lagos"]),
            QueryOptions::default(),
        );
        assert_eq!(result.layers.len(), 3);
        assert!(result.layers.values().all(FeatureCollection::is_empty));
        assert_eq!(result.tiles_loaded, 0);
        assert_eq!(result.features_total, 0);
    }

    #[test]
    fn test_region_outside_dataset() {
        let (_dir, svc) = service();
        let bbox = BoundingBox::region(10.0, 9.0, 11.0, 10.0).unwrap();
        let result = svc.query(&bbox, &names(&["rios"]), QueryOptions::default());
        assert!(result.layers["rios"].is_empty());
        assert_eq!(result.tiles_loaded, 0);
    }

    #[test]
    fn test_unreadable_tile_is_skipped() {
        let (dir, svc) = service();
        std::fs::write(dir.path().join("tiles/Hidrografia/rios/c0001_r0000.json.zst"), b"garbage").unwrap();

        let bbox = BoundingBox::region(-0.2, -1.8, 1.8, 0.1).unwrap();
        let result = svc.query(&bbox, &names(&["rios"]), QueryOptions::default());
        assert_eq!(
            ids(&result.layers["rios"]),
            vec![FeatureId::Number(1), FeatureId::Number(2)]
        );
        assert_eq!(result.skipped_tiles.len(), 1);
        assert_eq!(result.skipped_tiles[0].tile_id, "c0001_r0000");
        assert_eq!(result.tiles_loaded, 2);
    }

    #[test]
    fn test_point_query_on_tile_edge() {
        let (_dir, svc) = service();
        let bbox = BoundingBox::point(-0.5, 1.0).unwrap();
        let result = svc.query(&bbox, &names(&["rios"]), QueryOptions::default());
        assert_eq!(result.features_total, 2);
    }
}
