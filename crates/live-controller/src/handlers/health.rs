//! Health check handler.

use crate::errors::LcError;
use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /v1/health
///
/// Pings the persistent store and reports the registry size. An unreachable
/// store yields `"unhealthy"` with 200, so health checkers always get a body.
///
/// ```json
/// { "status": "healthy", "database": "healthy", "live_sessions": 3 }
/// ```
#[instrument(skip_all, name = "lc.health.check")]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, LcError> {
    let db_healthy = state.store.ping().await.is_ok();
    let registry = state.registry.status().await?;

    let health = if db_healthy { "healthy" } else { "unhealthy" };

    Ok(Json(HealthResponse {
        status: health.to_string(),
        database: Some(health.to_string()),
        live_sessions: registry.live_sessions,
    }))
}
