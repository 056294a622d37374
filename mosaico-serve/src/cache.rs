//! Index-driven tile loading with request-scoped handles
//!
//! [`TileCache`] owns the immutable master index and answers "which tiles
//! cover this region" from it alone. Payloads are loaded through a
//! [`TileScope`], which keeps every tile it opened for the duration of one
//! request and releases them together when the request ends, on success or
//! failure. An optional [`SharedTileCache`] keeps recently used payloads
//! alive across requests.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use mosaico_common::Result;
use mosaico_geometry::{BoundingBox, TileId};
use mosaico_io::{load_master_index, MasterIndex, TilePayload, TileStore};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

type TileKey = (String, TileId);

pub struct TileCache {
    index: Arc<MasterIndex>,
    store: TileStore,
    shared: Option<Arc<SharedTileCache>>,
}

impl TileCache {
    pub fn new(index: Arc<MasterIndex>, store: TileStore) -> Self {
        Self {
            index,
            store,
            shared: None,
        }
    }

    /// Read the master index of the store at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let (store, index) = load_master_index(root)?;
        Ok(Self::new(Arc::new(index), store))
    }

    /// Keep payloads alive across scopes in `shared`.
    pub fn with_shared(mut self, shared: Arc<SharedTileCache>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn index(&self) -> &MasterIndex {
        &self.index
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub fn shared(&self) -> Option<&SharedTileCache> {
        self.shared.as_deref()
    }

    /// Tiles of `layer` intersecting `region`, ascending.
    pub fn resolve(&self, region: &BoundingBox, layer: &str) -> Vec<TileId> {
        self.index.resolve(region, layer)
    }

    /// Same as [`TileCache::resolve`], rendered as tile id strings.
    pub fn resolve_tiles(&self, region: &BoundingBox, layer: &str) -> Vec<String> {
        self.resolve(region, layer)
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    /// Start a request scope.
    pub fn scope(&self) -> TileScope<'_> {
        TileScope {
            cache: self,
            loaded: HashMap::new(),
            released: false,
        }
    }
}

/// What a scope let go of when it ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    pub vector_tiles: usize,
    pub raster_tiles: usize,
    /// Raster mappings closed because this scope held the last reference
    pub rasters_unmapped: usize,
}

/// Payloads opened during one request.
///
/// Loading the same tile twice returns the same payload. Dropping the scope
/// releases everything, so early returns and panics cannot leak handles.
pub struct TileScope<'a> {
    cache: &'a TileCache,
    loaded: HashMap<TileKey, Arc<TilePayload>>,
    released: bool,
}

impl TileScope<'_> {
    /// Payload of an indexed tile, opening it on first use.
    pub fn load(&mut self, layer: &str, tile_id: TileId) -> Result<Arc<TilePayload>> {
        let key = (layer.to_string(), tile_id);
        if let Some(payload) = self.loaded.get(&key) {
            return Ok(Arc::clone(payload));
        }

        let shared = self.cache.shared();
        let payload = match shared.and_then(|s| s.get(&key)) {
            Some(payload) => payload,
            None => {
                let (path, meta) = self.cache.index.tile(&self.cache.store, layer, tile_id)?;
                let payload = Arc::new(TilePayload::open(&path, meta.format)?);
                debug!(layer, tile = %tile_id, path = %path.display(), "Opened tile");
                if let Some(shared) = shared {
                    shared.insert(key.clone(), Arc::clone(&payload));
                }
                payload
            }
        };
        self.loaded.insert(key, Arc::clone(&payload));
        Ok(payload)
    }

    /// Distinct tiles opened so far.
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// End the scope, closing what it opened.
    pub fn release(mut self) -> ReleaseReport {
        self.release_all()
    }

    fn release_all(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        if self.released {
            return report;
        }
        self.released = true;

        for ((layer, tile_id), payload) in self.loaded.drain() {
            if !payload.is_raster() {
                report.vector_tiles += 1;
                continue;
            }
            report.raster_tiles += 1;
            match Arc::try_unwrap(payload) {
                Ok(TilePayload::Raster(handle)) => {
                    handle.close();
                    report.rasters_unmapped += 1;
                }
                Ok(TilePayload::Vector(_)) => {}
                // Still held by the shared cache or another scope
                Err(_) => debug!(layer = %layer, tile = %tile_id, "Raster still shared"),
            }
        }
        report
    }
}

impl Drop for TileScope<'_> {
    fn drop(&mut self) {
        if !self.released {
            let report = self.release_all();
            debug!(
                vector = report.vector_tiles,
                raster = report.raster_tiles,
                "Released tile scope on drop"
            );
        }
    }
}

/// Counters of a [`SharedTileCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CacheStats {
    pub capacity: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded LRU of payloads shared by all scopes.
///
/// Entries are `Arc`s: evicting a tile only drops the cache's reference, a
/// scope still using it keeps the mapping alive until it finishes.
pub struct SharedTileCache {
    entries: Mutex<LruCache<TileKey, Arc<TilePayload>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SharedTileCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// `None` for a capacity of 0, which disables sharing.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(Self::new)
    }

    fn get(&self, key: &TileKey) -> Option<Arc<TilePayload>> {
        let found = self.entries.lock().get(key).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn insert(&self, key: TileKey, payload: Arc<TilePayload>) {
        let displaced = self.entries.lock().push(key.clone(), payload);
        if let Some((old_key, _)) = displaced {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(layer = %old_key.0, tile = %old_key.1, "Evicted shared tile");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            capacity: entries.cap().get(),
            entries: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
