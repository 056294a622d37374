//! Query side of mosaico
//!
//! HTTP service answering viewport and elevation requests from a built tile
//! store.
//!
//! # Endpoints
//!
//! - `POST /tiles/vector/query` - Features of named layers within a box
//! - `POST /tiles/elevation/batch` - Elevations for indexed points
//! - `GET /tiles/index` - Layer summary of the loaded index
//! - `GET /health` - Health check
//! - `GET /api-docs/openapi.json` - OpenAPI document
//!
//! # Architecture
//!
//! Every request runs on the blocking pool with its own [`TileScope`]:
//! - tiles are located through the master index, never by scanning
//! - each tile is opened at most once per request
//! - the scope closes what it opened when the request finishes

pub mod api;
pub mod cache;
pub mod elevation;
pub mod state;
pub mod vector;

#[cfg(test)]
mod fixture;

use std::sync::Arc;

use mosaico_common::{MosaicoConfig, Result};
use tracing::info;

pub use cache::{CacheStats, ReleaseReport, SharedTileCache, TileCache, TileScope};
pub use elevation::{
    procedural_elevation, ElevationBatch, ElevationPoint, ElevationResolver, ElevationSample,
    ElevationSource, FallbackReason,
};
pub use state::ServerState;
pub use vector::{QueryOptions, SkippedTile, VectorQueryResult, VectorQueryService};

/// Load the index and serve until the process is stopped.
pub async fn serve(config: &MosaicoConfig) -> Result<()> {
    let state = Arc::new(ServerState::load(config)?);
    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.serve.bind).await?;
    info!(addr = %listener.local_addr()?, "Tile service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
