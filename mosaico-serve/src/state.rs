//! Server state: the index-backed tile cache and the services built on it

use std::sync::Arc;

use mosaico_common::{LayerKind, MosaicoConfig, Result, ServeConfig};
use tracing::{info, warn};

use crate::cache::{SharedTileCache, TileCache};
use crate::elevation::ElevationResolver;
use crate::vector::VectorQueryService;

pub struct ServerState {
    pub config: ServeConfig,
    pub cache: Arc<TileCache>,
    pub shared: Option<Arc<SharedTileCache>>,
    pub elevation: ElevationResolver,
    pub vector: VectorQueryService,
}

impl ServerState {
    /// Open the tile store named by the config.
    ///
    /// A missing store or master index is fatal; everything after this
    /// degrades per tile or per point instead of failing.
    pub fn load(config: &MosaicoConfig) -> Result<Self> {
        let cache = TileCache::open(&config.dataset.store)?;
        let index = cache.index();
        info!(
            store = %config.dataset.store.display(),
            layers = index.layers.len(),
            tiles = index.total_tiles,
            features = index.total_features,
            "Loaded master index"
        );
        Ok(Self::new(cache, config.serve.clone()))
    }

    pub fn new(cache: TileCache, config: ServeConfig) -> Self {
        let shared = SharedTileCache::with_capacity(config.shared_cache_capacity).map(Arc::new);
        let cache = match &shared {
            Some(shared) => cache.with_shared(Arc::clone(shared)),
            None => cache,
        };

        match cache.index().layers.get(&config.elevation_layer) {
            Some(layer) if layer.kind == LayerKind::Raster => {}
            Some(_) => warn!(
                layer = %config.elevation_layer,
                "Elevation layer is not a raster layer, all elevations will be estimated"
            ),
            None => warn!(
                layer = %config.elevation_layer,
                "Elevation layer missing from the index, all elevations will be estimated"
            ),
        }

        let cache = Arc::new(cache);
        let elevation = ElevationResolver::new(Arc::clone(&cache), &config.elevation_layer)
            .with_sampling(config.sampling)
            .with_fallback(config.fallback)
            .with_index_limit(config.max_batch_points);
        let vector = VectorQueryService::new(Arc::clone(&cache));
        Self {
            config,
            cache,
            shared,
            elevation,
            vector,
        }
    }
}
