//! HTTP API handlers with Axum and Utoipa

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mosaico_geometry::{BoundingBox, FeatureCollection};
use mosaico_io::LayerSummary;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;
use utoipa::{OpenApi, ToSchema};

use crate::cache::CacheStats;
use crate::elevation::ElevationPoint;
use crate::state::ServerState;
use crate::vector::{QueryOptions, SkippedTile};

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(vector_query, elevation_batch, tile_index, health),
    components(schemas(
        QueryBounds,
        VectorQueryRequest,
        VectorQueryResponse,
        ElevationPoint,
        ElevationBatchRequest,
        ElevationBatchResponse,
        IndexResponse,
        HealthResponse,
        CacheStats,
        SkippedTile,
        ErrorResponse
    )),
    info(
        title = "Mosaico Tile API",
        version = "1.0.0",
        description = "Viewport vector queries and batch elevation lookups over a partitioned tile store"
    )
)]
struct ApiDoc;

/// Build the Axum router
pub fn build_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tiles/vector/query", post(vector_query))
        .route("/tiles/elevation/batch", post(elevation_batch))
        .route("/tiles/index", get(tile_index))
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

fn bad_request(error: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            error: error.into(),
        }),
    )
        .into_response()
}

fn internal_error(error: impl Into<String>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            success: false,
            error: error.into(),
        }),
    )
        .into_response()
}

// ============ Vector Query Endpoint ============

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct QueryBounds {
    #[schema(example = -34.5)]
    pub north: f64,
    #[schema(example = -34.7)]
    pub south: f64,
    #[schema(example = -58.3)]
    pub east: f64,
    #[schema(example = -58.5)]
    pub west: f64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VectorQueryRequest {
    pub bounds: QueryBounds,
    /// Layer names, e.g. `["ruta_nacional", "hidrografia"]`
    pub layers: Vec<String>,
    /// Drop features repeated across tiles that share an id
    #[serde(default)]
    pub dedupe_by_id: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VectorQueryResponse {
    pub success: bool,
    pub tiles_loaded: usize,
    pub features_total: usize,
    /// GeoJSON FeatureCollection per requested layer
    #[schema(value_type = Object)]
    pub layers: BTreeMap<String, FeatureCollection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_tiles: Vec<SkippedTile>,
}

/// Features of the requested layers within a bounding box
#[utoipa::path(
    post,
    path = "/tiles/vector/query",
    request_body = VectorQueryRequest,
    responses(
        (status = 200, description = "Features per layer", body = VectorQueryResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
    )
)]
async fn vector_query(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<VectorQueryRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(e.body_text()),
    };

    if req.layers.is_empty() {
        return bad_request("layers cannot be empty");
    }
    let max_layers = state.config.max_query_layers;
    if req.layers.len() > max_layers {
        return bad_request(format!(
            "too many layers: {} (max {max_layers})",
            req.layers.len()
        ));
    }
    let b = req.bounds;
    let bbox = match BoundingBox::region(b.north, b.south, b.east, b.west) {
        Ok(bbox) => bbox,
        Err(e) => return bad_request(e.to_string()),
    };
    let options = QueryOptions {
        dedupe_by_id: req.dedupe_by_id,
    };

    let layers = req.layers;
    let result =
        tokio::task::spawn_blocking(move || state.vector.query(&bbox, &layers, options)).await;
    match result {
        Ok(result) => Json(VectorQueryResponse {
            success: true,
            tiles_loaded: result.tiles_loaded,
            features_total: result.features_total,
            layers: result.layers,
            skipped_tiles: result.skipped_tiles,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "Vector query task failed");
            internal_error("vector query failed")
        }
    }
}

// ============ Elevation Batch Endpoint ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct ElevationBatchRequest {
    pub points: Vec<ElevationPoint>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ElevationBatchResponse {
    pub success: bool,
    /// Meters, indexed by each point's `index`; `null` where no point was given
    pub elevations: Vec<Option<f64>>,
    pub count: usize,
    pub valid_count: usize,
    pub tiles_loaded: usize,
    /// Milliseconds spent resolving the batch
    pub processing_time: f64,
}

/// Request-level check only; bad coordinates fall back per point.
fn check_point(point: &ElevationPoint, max_points: usize) -> Result<(), String> {
    if point.index >= max_points {
        return Err(format!(
            "point index {} out of range (max {})",
            point.index,
            max_points - 1
        ));
    }
    Ok(())
}

/// Elevations for a batch of points
#[utoipa::path(
    post,
    path = "/tiles/elevation/batch",
    request_body = ElevationBatchRequest,
    responses(
        (status = 200, description = "One elevation slot per index", body = ElevationBatchResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
    )
)]
async fn elevation_batch(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<ElevationBatchRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(e.body_text()),
    };

    let max_points = state.config.max_batch_points;
    if req.points.len() > max_points {
        return bad_request(format!(
            "too many points: {} (max {max_points})",
            req.points.len()
        ));
    }
    if let Some(e) = req.points.iter().find_map(|p| check_point(p, max_points).err()) {
        return bad_request(e);
    }

    let started = Instant::now();
    let points = req.points;
    let result = tokio::task::spawn_blocking(move || state.elevation.elevation_batch(&points)).await;
    match result {
        Ok(batch) => Json(ElevationBatchResponse {
            success: true,
            elevations: batch.elevations,
            count: batch.count,
            valid_count: batch.valid_count,
            tiles_loaded: batch.tiles_loaded,
            processing_time: started.elapsed().as_secs_f64() * 1000.0,
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, "Elevation batch task failed");
            internal_error("elevation batch failed")
        }
    }
}

// ============ Index and Health ============

#[derive(Debug, Serialize, ToSchema)]
pub struct IndexResponse {
    #[schema(value_type = Object)]
    pub bounds: BoundingBox,
    pub cell_size: f64,
    pub total_tiles: u64,
    pub total_features: u64,
    /// Per-layer category, kind, counts and bounds
    #[schema(value_type = Object)]
    pub layers: BTreeMap<String, LayerSummary>,
}

/// Summary of the loaded index
#[utoipa::path(
    get,
    path = "/tiles/index",
    responses((status = 200, description = "Layer summary", body = IndexResponse))
)]
async fn tile_index(State(state): State<Arc<ServerState>>) -> Json<IndexResponse> {
    let index = state.cache.index();
    Json(IndexResponse {
        bounds: index.bounds,
        cell_size: index.cell_size,
        total_tiles: index.total_tiles,
        total_features: index.total_features,
        layers: index
            .layers
            .iter()
            .map(|(name, layer)| (name.clone(), layer.summary()))
            .collect(),
    })
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub layers: usize,
    pub total_tiles: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let index = state.cache.index();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        layers: index.layers.len(),
        total_tiles: index.total_tiles,
        cache: state.shared.as_ref().map(|s| s.stats()),
    })
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
