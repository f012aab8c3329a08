//! Event handlers.

use crate::errors::LcError;
use crate::models::LiveBroadcast;
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::Json;
use common::types::EventId;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /v1/events/:event_id/live
///
/// One entry per stage: a host and a co-host broadcasting on the same stage
/// are listed once with a merged roster.
#[instrument(skip_all, name = "lc.handlers.list_live", fields(event_id = %event_id))]
pub async fn list_live(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<LiveBroadcast>>, LcError> {
    let broadcasts = state
        .registry
        .list_live_by_event(EventId::new(event_id))
        .await?;
    Ok(Json(broadcasts))
}
