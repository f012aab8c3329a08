//! Live session handlers.
//!
//! Starting a session leases the host's stage, registers the session and
//! binds it to the lease. Stopping it retires the session and clears the
//! binding, unless a newer session of the same host has already taken it.
//! The lease itself outlives the session so the host's next broadcast reuses
//! the same stage.

use crate::actors::StartSession;
use crate::errors::LcError;
use crate::middleware::CallerId;
use crate::models::{
    validate_display_name, StageLease, StartSessionRequest, StartSessionResponse,
};
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use common::types::{EventId, SessionId};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Handler for POST /v1/events/:event_id/sessions
///
/// # Response
///
/// - 201 Created with the session id, stage and initial roster
/// - 400 Bad Request for a malformed display name or metadata
/// - 401 Unauthorized without a caller identity
/// - 502 Bad Gateway if the stage could not be created
#[instrument(skip_all, name = "lc.handlers.start_session", fields(event_id = %event_id))]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    CallerId(caller): CallerId,
    Json(request): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<StartSessionResponse>), LcError> {
    let event_id = EventId::new(event_id);

    // Reject bad input before a stage gets created for it.
    validate_display_name(&request.display_name)?;
    request.metadata.validate()?;

    let lease = state
        .coordinator
        .lease_stage(&event_id, &caller, request.display_name.trim())
        .await?;

    let session = state
        .registry
        .start_session(StartSession {
            event_id,
            host_user_id: caller,
            host_display_name: request.display_name,
            metadata: request.metadata,
            stage_ref: lease.stage_ref.clone(),
        })
        .await?;

    if let Err(e) = state
        .coordinator
        .bind_session(&lease.stage_key, &session.session_id)
        .await
    {
        warn!(
            target: "lc.handlers.sessions",
            session_id = %session.session_id,
            error = %e,
            "Failed to bind session to stage lease"
        );
    }

    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: session.session_id,
            stage_ref: session.stage_ref,
            version: session.version,
            roster: session.roster,
        }),
    ))
}

/// Handler for POST /v1/sessions/:session_id/heartbeat
#[instrument(skip_all, name = "lc.handlers.heartbeat", fields(session_id = %session_id))]
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    CallerId(caller): CallerId,
) -> Result<StatusCode, LcError> {
    state
        .registry
        .heartbeat(SessionId::new(session_id), caller)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /v1/sessions/:session_id/participants/heartbeat
#[instrument(
    skip_all,
    name = "lc.handlers.participant_heartbeat",
    fields(session_id = %session_id)
)]
pub async fn participant_heartbeat(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    CallerId(caller): CallerId,
) -> Result<StatusCode, LcError> {
    state
        .registry
        .participant_heartbeat(SessionId::new(session_id), caller)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for DELETE /v1/sessions/:session_id
///
/// # Response
///
/// - 204 No Content once the session is retired
/// - 401 Unauthorized if the caller does not own it
/// - 404 Not Found if it is not live
#[instrument(skip_all, name = "lc.handlers.stop_session", fields(session_id = %session_id))]
pub async fn stop_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    CallerId(caller): CallerId,
) -> Result<StatusCode, LcError> {
    let session = state
        .registry
        .stop_session(SessionId::new(session_id), caller)
        .await?;

    let stage_key = StageLease::key_for(&session.event_id, &session.host_user_id);
    if let Err(e) = state
        .coordinator
        .unbind_session(&stage_key, &session.session_id)
        .await
    {
        warn!(
            target: "lc.handlers.sessions",
            session_id = %session.session_id,
            error = %e,
            "Failed to unbind session from stage lease"
        );
    }

    Ok(StatusCode::NO_CONTENT)
}
