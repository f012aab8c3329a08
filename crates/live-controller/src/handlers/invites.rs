//! Invite handlers.
//!
//! Peek always answers 200 with a validity summary. Consume answers with the
//! status that matches the outcome (`used` is 409, `expired` is 410, and so
//! on) and the full [`ConsumeResult`] as the body, so clients can tell the
//! reasons apart from either.

use crate::errors::LcError;
use crate::middleware::CallerId;
use crate::models::{
    ConsumeInviteRequest, ConsumeResult, CreateInviteRequest, CreatedInvite, PeekResult,
};
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::secret::log_prefix;
use common::types::SessionId;
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /v1/sessions/:session_id/invites
///
/// The body is optional; `ttl_seconds` is clamped to [60, 3600].
#[instrument(skip_all, name = "lc.handlers.create_invite", fields(session_id = %session_id))]
pub async fn create_invite(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    CallerId(caller): CallerId,
    body: Option<Json<CreateInviteRequest>>,
) -> Result<(StatusCode, Json<CreatedInvite>), LcError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let created = state
        .ledger
        .create_invite(&SessionId::new(session_id), &caller, request.ttl_seconds)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Handler for GET /v1/invites/:code
#[instrument(skip_all, name = "lc.handlers.peek_invite", fields(code = %log_prefix(&code)))]
pub async fn peek_invite(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<PeekResult>, LcError> {
    Ok(Json(state.ledger.peek(&code).await?))
}

/// Handler for POST /v1/invites/:code/consume
///
/// An anonymous caller gets `auth_required` (401) rather than a bare
/// rejection.
#[instrument(skip_all, name = "lc.handlers.consume_invite", fields(code = %log_prefix(&code)))]
pub async fn consume_invite(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    caller: Option<CallerId>,
    Json(request): Json<ConsumeInviteRequest>,
) -> Result<Response, LcError> {
    let user_id = caller.map(|CallerId(id)| id);

    let result = state
        .ledger
        .consume(
            &code,
            user_id.as_ref(),
            &request.display_name,
            request.stage_ref.as_ref(),
        )
        .await?;

    Ok((consume_status(&result), Json(result)).into_response())
}

fn consume_status(result: &ConsumeResult) -> StatusCode {
    match result.reason {
        None => StatusCode::OK,
        Some(reason) => StatusCode::from_u16(LcError::from(reason).status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Handler for DELETE /v1/invites/:code
#[instrument(skip_all, name = "lc.handlers.revoke_invite", fields(code = %log_prefix(&code)))]
pub async fn revoke_invite(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    CallerId(caller): CallerId,
) -> Result<StatusCode, LcError> {
    state.ledger.revoke(&code, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}
