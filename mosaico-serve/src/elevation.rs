//! Elevation lookups against the raster layer
//!
//! Each coordinate is resolved through the index to the raster tiles whose
//! boxes contain it. Candidates are tried in ascending tile id order and the
//! first one whose pixel grid contains the point answers; on shared tile
//! edges that is the western or northern tile. Points without a usable
//! sample get the procedural estimate, or `null` in batches under
//! [`FallbackPolicy::NoData`].

use std::fmt;
use std::sync::Arc;

use mosaico_common::{FallbackPolicy, Sampling};
use mosaico_geometry::BoundingBox;
use mosaico_io::RasterHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::cache::{TileCache, TileScope};

/// Deterministic stand-in for terrain where no raster sample exists.
///
/// A smooth, non-negative surface between 10 and 290 meters. It is an
/// approximation for display purposes, not measured elevation. Non-finite
/// input yields 0.
pub fn procedural_elevation(lat: f64, lon: f64) -> f64 {
    let plains = 150.0 + 80.0 * (lat.to_radians() * 4.0).sin() * (lon.to_radians() * 3.0).cos();
    let ridges = 60.0 * ((lat + 0.5 * lon).to_radians() * 9.0).sin();
    (plains + ridges).max(0.0)
}

/// One point of a batch; `index` is the slot its result is written to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ElevationPoint {
    #[schema(example = -34.6)]
    pub lat: f64,
    #[schema(example = -58.4)]
    pub lon: f64,
    pub index: usize,
}

/// Why a point got no raster sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No raster tile covers the point
    NoCoverage,
    /// Covering tiles exist but the pixel falls outside their grids
    OutOfRange,
    /// The pixel holds the nodata value
    NoData,
    /// A covering tile could not be opened or decoded
    LoadFailed,
    /// Not a finite coordinate
    InvalidCoordinate,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FallbackReason::NoCoverage => "no raster coverage",
            FallbackReason::OutOfRange => "pixel outside tile",
            FallbackReason::NoData => "nodata sample",
            FallbackReason::LoadFailed => "tile failed to load",
            FallbackReason::InvalidCoordinate => "invalid coordinate",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ElevationSource {
    Raster { tile_id: String },
    Fallback { reason: FallbackReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElevationSample {
    /// Meters; the procedural estimate when `source` is a fallback
    pub value: f64,
    #[serde(flatten)]
    pub source: ElevationSource,
}

impl ElevationSample {
    fn fallback(lat: f64, lon: f64, reason: FallbackReason) -> Self {
        Self {
            value: procedural_elevation(lat, lon),
            source: ElevationSource::Fallback { reason },
        }
    }

    pub fn is_raster(&self) -> bool {
        matches!(self.source, ElevationSource::Raster { .. })
    }
}

/// Result of [`ElevationResolver::elevation_batch`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElevationBatch {
    /// `max(index) + 1` slots; slots no point was written to are `None`
    pub elevations: Vec<Option<f64>>,
    /// Points in the request
    pub count: usize,
    /// Slots holding a value
    pub valid_count: usize,
    /// Points answered by the procedural estimate or left `None`
    pub fallback_count: usize,
    /// Points dropped because their index is at or above the resolver's limit
    pub skipped_count: usize,
    pub tiles_loaded: usize,
}

/// Highest batch slot count a resolver allocates unless configured otherwise
pub const DEFAULT_INDEX_LIMIT: usize = 1_000_000;

pub struct ElevationResolver {
    cache: Arc<TileCache>,
    layer: String,
    sampling: Sampling,
    fallback: FallbackPolicy,
    index_limit: usize,
}

impl ElevationResolver {
    pub fn new(cache: Arc<TileCache>, layer: &str) -> Self {
        Self {
            cache,
            layer: layer.to_string(),
            sampling: Sampling::default(),
            fallback: FallbackPolicy::default(),
            index_limit: DEFAULT_INDEX_LIMIT,
        }
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Batch points must have `index < limit`; others are skipped.
    pub fn with_index_limit(mut self, limit: usize) -> Self {
        self.index_limit = limit;
        self
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Elevation in meters at one coordinate, never failing.
    pub fn elevation_at(&self, lat: f64, lon: f64) -> f64 {
        let mut scope = self.cache.scope();
        self.sample(&mut scope, lat, lon).value
    }

    /// Resolve one coordinate using tiles opened in `scope`.
    pub fn sample(&self, scope: &mut TileScope<'_>, lat: f64, lon: f64) -> ElevationSample {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return ElevationSample::fallback(lat, lon, FallbackReason::InvalidCoordinate);
        }
        let Ok(region) = BoundingBox::point(lat, lon) else {
            return ElevationSample::fallback(lat, lon, FallbackReason::InvalidCoordinate);
        };
        let candidates = self.cache.resolve(&region, &self.layer);
        if candidates.is_empty() {
            return ElevationSample::fallback(lat, lon, FallbackReason::NoCoverage);
        }

        let mut reason = FallbackReason::OutOfRange;
        for tile_id in candidates {
            let payload = match scope.load(&self.layer, tile_id) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(layer = %self.layer, tile = %tile_id, error = %e, "Elevation tile unavailable");
                    reason = FallbackReason::LoadFailed;
                    continue;
                }
            };
            let Some(raster) = payload.as_raster() else {
                warn!(layer = %self.layer, tile = %tile_id, "Elevation layer holds a vector tile");
                reason = FallbackReason::LoadFailed;
                continue;
            };
            let Some((row, col)) = raster.geo_to_pixel(lat, lon) else {
                continue;
            };

            return match self.read(raster, lat, lon, row, col) {
                Some(value) => ElevationSample {
                    value,
                    source: ElevationSource::Raster {
                        tile_id: tile_id.to_string(),
                    },
                },
                None => {
                    debug!(tile = %tile_id, row, col, "Nodata sample");
                    ElevationSample::fallback(lat, lon, FallbackReason::NoData)
                }
            };
        }
        ElevationSample::fallback(lat, lon, reason)
    }

    fn read(&self, raster: &RasterHandle, lat: f64, lon: f64, row: usize, col: usize) -> Option<f64> {
        let nearest = || {
            raster
                .value_at(row, col)
                .filter(|v| !raster.is_nodata(*v))
                .map(f64::from)
        };
        match self.sampling {
            Sampling::Nearest => nearest(),
            // Edges and nodata neighbours fall back to the containing pixel
            Sampling::Bilinear => raster.interpolate(lat, lon).or_else(nearest),
        }
    }

    /// Resolve many points with one scope, so each tile is opened once.
    pub fn elevation_batch(&self, points: &[ElevationPoint]) -> ElevationBatch {
        let (accepted, rejected): (Vec<&ElevationPoint>, Vec<&ElevationPoint>) =
            points.iter().partition(|p| p.index < self.index_limit);
        for point in &rejected {
            warn!(index = point.index, limit = self.index_limit, "Batch point index out of range, skipped");
        }
        let len = accepted.iter().map(|p| p.index + 1).max().unwrap_or(0);
        let mut elevations = vec![None; len];
        let mut fallback_count = 0;

        let mut scope = self.cache.scope();
        for point in accepted {
            let sample = self.sample(&mut scope, point.lat, point.lon);
            if !sample.is_raster() {
                fallback_count += 1;
            }
            elevations[point.index] = match (&sample.source, self.fallback) {
                (ElevationSource::Fallback { .. }, FallbackPolicy::NoData) => None,
                _ => Some(sample.value),
            };
        }
        let tiles_loaded = scope.len();
        let released = scope.release();
        debug!(
            points = points.len(),
            tiles = tiles_loaded,
            unmapped = released.rasters_unmapped,
            "Elevation batch done"
        );

        ElevationBatch {
            valid_count: elevations.iter().filter(|e| e.is_some()).count(),
            count: points.len(),
            fallback_count,
            skipped_count: rejected.len(),
            tiles_loaded,
            elevations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture;
    use tempfile::TempDir;

    fn resolver() -> (TempDir, ElevationResolver) {
        let (dir, cache) = fixture::cache();
        (dir, ElevationResolver::new(Arc::new(cache), "elevacion"))
    }

    fn sample(resolver: &ElevationResolver, lat: f64, lon: f64) -> ElevationSample {
        let cache = Arc::clone(&resolver.cache);
        let mut scope = cache.scope();
        resolver.sample(&mut scope, lat, lon)
    }

    fn point(lat: f64, lon: f64, index: usize) -> ElevationPoint {
        ElevationPoint { lat, lon, index }
    }

    #[test]
    fn test_elevation_reads_pixel() {
        let (_dir, r) = resolver();
        assert_eq!(r.elevation_at(-0.6, 0.6), 22.0);
        // Second row of cells, re-anchored tile window
        assert_eq!(r.elevation_at(-1.1, 0.35), 41.0);
        assert_eq!(
            sample(&r, -1.1, 0.35).source,
            ElevationSource::Raster {
                tile_id: "c0000_r0001".to_string()
            }
        );
    }

    #[test]
    fn test_shared_edge_prefers_first_tile() {
        let (_dir, r) = resolver();
        // lat -1.0 lies on both row 0 and row 1 cells
        let s = sample(&r, -1.0, 0.6);
        assert_eq!(s.value, 42.0);
        assert_eq!(
            s.source,
            ElevationSource::Raster {
                tile_id: "c0000_r0000".to_string()
            }
        );
    }

    #[test]
    fn test_matches_source_raster() {
        let (_dir, r) = resolver();
        let dem = fixture::dem();
        for (row, col) in [(1, 1), (3, 2), (5, 3), (7, 0)] {
            let (lat, lon) = dem.transform.pixel_center(row, col);
            let expected = dem.value_at(row, col).map(f64::from);
            assert_eq!(Some(r.elevation_at(lat, lon)), expected, "pixel ({row}, {col})");
        }
    }

    #[test]
    fn test_fallback_reasons() {
        let (_dir, r) = resolver();

        let nodata = sample(&r, -0.1, 0.1);
        assert_eq!(
            nodata.source,
            ElevationSource::Fallback {
                reason: FallbackReason::NoData
            }
        );
        assert_eq!(nodata.value, procedural_elevation(-0.1, 0.1));

        // Eastern tiles only hold the shared edge pixel column
        let outside = sample(&r, -0.5, 1.5);
        assert_eq!(
            outside.source,
            ElevationSource::Fallback {
                reason: FallbackReason::OutOfRange
            }
        );

        let uncovered = sample(&r, 10.0, 10.0);
        assert_eq!(
            uncovered.source,
            ElevationSource::Fallback {
                reason: FallbackReason::NoCoverage
            }
        );
        assert_eq!(r.elevation_at(10.0, 10.0), procedural_elevation(10.0, 10.0));

        let invalid = sample(&r, f64::NAN, 0.5);
        assert_eq!(invalid.value, 0.0);
    }

    #[test]
    fn test_unknown_layer_falls_back() {
        let (_dir, cache) = fixture::cache();
        let r = ElevationResolver::new(Arc::new(cache), "altimetria");
        assert_eq!(r.elevation_at(-0.6, 0.6), procedural_elevation(-0.6, 0.6));
    }

    #[test]
    fn test_bilinear_sampling() {
        let (_dir, cache) = fixture::cache();
        let r = ElevationResolver::new(Arc::new(cache), "elevacion").with_sampling(Sampling::Bilinear);
        // On a pixel center the interpolation is the pixel itself
        assert!((r.elevation_at(-0.625, 0.625) - 22.0).abs() < 1e-9);
        // Halfway between the centers of (2, 2) and (2, 3)
        assert!((r.elevation_at(-0.625, 0.75) - 22.5).abs() < 1e-9);
        // Next to the nodata pixel: nearest sample instead
        assert_eq!(r.elevation_at(-0.2, 0.3), 1.0);
    }

    #[test]
    fn test_batch_writes_at_index() {
        let (_dir, r) = resolver();
        let batch = r.elevation_batch(&[point(-0.6, 0.6, 5), point(-1.1, 0.35, 0)]);
        assert_eq!(batch.elevations.len(), 6);
        assert_eq!(batch.elevations[5], Some(22.0));
        assert_eq!(batch.elevations[0], Some(41.0));
        assert!(batch.elevations[1..5].iter().all(Option::is_none));
        assert_eq!(batch.count, 2);
        assert_eq!(batch.valid_count, 2);
        assert_eq!(batch.fallback_count, 0);
        assert_eq!(batch.tiles_loaded, 2);
    }

    #[test]
    fn test_batch_reuses_tiles() {
        let (_dir, r) = resolver();
        let points: Vec<_> = (0..50)
            .map(|i| point(-0.3 - 0.01 * i as f64, 0.3, i))
            .collect();
        let batch = r.elevation_batch(&points);
        assert_eq!(batch.tiles_loaded, 1);
        assert_eq!(batch.valid_count, 50);
    }

    #[test]
    fn test_batch_fallback_policies() {
        let (_dir, cache) = fixture::cache();
        let cache = Arc::new(cache);
        let points = [point(-0.6, 0.6, 0), point(10.0, 10.0, 1)];

        let procedural = ElevationResolver::new(Arc::clone(&cache), "elevacion").elevation_batch(&points);
        assert_eq!(procedural.elevations[1], Some(procedural_elevation(10.0, 10.0)));
        assert_eq!(procedural.valid_count, 2);
        assert_eq!(procedural.fallback_count, 1);

        let nodata = ElevationResolver::new(cache, "elevacion")
            .with_fallback(FallbackPolicy::NoData)
            .elevation_batch(&points);
        assert_eq!(nodata.elevations, vec![Some(22.0), None]);
        assert_eq!(nodata.valid_count, 1);
    }

    #[test]
    fn test_batch_skips_indices_past_limit() {
        let (_dir, cache) = fixture::cache();
        let r = ElevationResolver::new(Arc::new(cache), "elevacion").with_index_limit(10);
        let batch = r.elevation_batch(&[
            point(-0.6, 0.6, 1),
            point(-0.6, 0.6, usize::MAX),
            point(-0.6, 0.6, 10),
        ]);
        assert_eq!(batch.elevations, vec![None, Some(22.0)]);
        assert_eq!(batch.count, 3);
        assert_eq!(batch.skipped_count, 2);
        assert_eq!(batch.valid_count, 1);

        // Default limit still guards the allocation
        let (_dir, cache) = fixture::cache();
        let r = ElevationResolver::new(Arc::new(cache), "elevacion");
        let batch = r.elevation_batch(&[point(-0.6, 0.6, usize::MAX), point(-0.6, 0.6, 0)]);
        assert_eq!(batch.elevations, vec![Some(22.0)]);
        assert_eq!(batch.skipped_count, 1);
    }

    #[test]
    fn test_out_of_range_coordinates_fall_back() {
        let (_dir, r) = resolver();
        let s = sample(&r, 95.0, 0.5);
        assert_eq!(
            s.source,
            ElevationSource::Fallback {
                reason: FallbackReason::InvalidCoordinate
            }
        );
        let batch = r.elevation_batch(&[point(-0.6, 0.6, 0), point(95.0, 0.5, 1)]);
        assert_eq!(batch.elevations[0], Some(22.0));
        assert_eq!(batch.elevations[1], Some(procedural_elevation(95.0, 0.5)));
        assert_eq!(batch.fallback_count, 1);
    }

    #[test]
    fn test_empty_batch() {
        let (_dir, r) = resolver();
        let batch = r.elevation_batch(&[]);
        assert!(batch.elevations.is_empty());
        assert_eq!(batch.count, 0);
        assert_eq!(batch.tiles_loaded, 0);
    }

    #[test]
    fn test_corrupt_tile_only_affects_its_points() {
        let (dir, r) = resolver();
        std::fs::write(dir.path().join("tiles/Relieve/elevacion/c0000_r0001.mrt"), b"MRT1").unwrap();

        let batch = r.elevation_batch(&[point(-0.6, 0.6, 0), point(-1.6, 0.6, 1)]);
        assert_eq!(batch.elevations[0], Some(22.0));
        assert_eq!(batch.elevations[1], Some(procedural_elevation(-1.6, 0.6)));
        assert_eq!(
            sample(&r, -1.6, 0.6).source,
            ElevationSource::Fallback {
                reason: FallbackReason::LoadFailed
            }
        );
    }

    #[test]
    fn test_procedural_is_smooth_and_non_negative() {
        let mut lat = -56.0;
        while lat <= -21.0 {
            let mut lon = -74.0;
            while lon <= -53.0 {
                let h = procedural_elevation(lat, lon);
                assert!(h >= 0.0);
                assert_eq!(h, procedural_elevation(lat, lon));
                assert!((h - procedural_elevation(lat + 0.001, lon + 0.001)).abs() < 1.0);
                lon += 0.7;
            }
            lat += 0.7;
        }
    }
}
