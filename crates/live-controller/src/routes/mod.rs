//! HTTP routes for the Live Controller.
//!
//! Defines the Axum router and application state.

use crate::actors::SessionRegistryHandle;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::repositories::PersistentStore;
use crate::services::{InviteLedger, StageCoordinator};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout for every route.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Persistent store, pinged by the health check.
    pub store: Arc<dyn PersistentStore>,

    pub coordinator: Arc<StageCoordinator>,

    pub registry: SessionRegistryHandle,

    pub ledger: Arc<InviteLedger>,
}

/// Build the application routes.
///
/// - `/v1/health` - health check (public)
/// - `/metrics` - Prometheus scrape endpoint (public)
/// - `/v1/events/:event_id/sessions` - start a session
/// - `/v1/events/:event_id/live` - live broadcasts for an event
/// - `/v1/sessions/:session_id` - stop a session
/// - `/v1/sessions/:session_id/heartbeat` - owner heartbeat
/// - `/v1/sessions/:session_id/participants/heartbeat` - roster entry heartbeat
/// - `/v1/sessions/:session_id/invites` - issue an invite
/// - `/v1/invites/:code` - peek or revoke an invite
/// - `/v1/invites/:code/consume` - redeem an invite
///
/// Identity-bearing routes read the caller from `x-user-id`.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/events/:event_id/sessions", post(handlers::start_session))
        .route("/v1/events/:event_id/live", get(handlers::list_live))
        .route(
            "/v1/sessions/:session_id",
            delete(handlers::stop_session),
        )
        .route("/v1/sessions/:session_id/heartbeat", post(handlers::heartbeat))
        .route(
            "/v1/sessions/:session_id/participants/heartbeat",
            post(handlers::participant_heartbeat),
        )
        .route(
            "/v1/sessions/:session_id/invites",
            post(handlers::create_invite),
        )
        .route(
            "/v1/invites/:code",
            get(handlers::peek_invite).delete(handlers::revoke_invite),
        )
        .route("/v1/invites/:code/consume", post(handlers::consume_invite))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees every response)
    api_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
