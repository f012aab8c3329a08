//! Live Controller error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Upstream
//! failures (database, media transport, notification channel) are logged
//! server-side and rendered to clients with a generic message.
//!
//! Invite redemption outcomes (`expired`, `used`, `not_found`,
//! `session_mismatch`, `auth_required`) are NOT errors. They travel as an
//! [`InviteReason`](crate::models::InviteReason) inside the peek/consume
//! results so callers can give different guidance for each.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Live Controller error type.
///
/// Maps to HTTP status codes:
/// - NotFound: 404 Not Found
/// - Unauthorized: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - Validation: 400 Bad Request
/// - Conflict, AlreadyUsed: 409 Conflict
/// - Expired: 410 Gone
/// - MediaTransport: 502 Bad Gateway
/// - Database, Notification, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum LcError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invite expired")]
    Expired,

    #[error("Invite already used")]
    AlreadyUsed,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Media transport error: {0}")]
    MediaTransport(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LcError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            LcError::NotFound(_) => 404,
            LcError::Unauthorized(_) => 401,
            LcError::Forbidden(_) => 403,
            LcError::Validation(_) => 400,
            LcError::Conflict(_) | LcError::AlreadyUsed => 409,
            LcError::Expired => 410,
            LcError::MediaTransport(_) => 502,
            LcError::Database(_) | LcError::Notification(_) | LcError::Internal(_) => 500,
        }
    }

    /// Whether the error came from a collaborator rather than the caller.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            LcError::Database(_) | LcError::MediaTransport(_) | LcError::Notification(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for LcError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            LcError::NotFound(resource) => (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone()),
            LcError::Unauthorized(reason) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", reason.clone())
            }
            LcError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            LcError::Validation(reason) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", reason.clone())
            }
            LcError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            LcError::Expired => (
                StatusCode::GONE,
                "EXPIRED",
                "The invite has expired".to_string(),
            ),
            LcError::AlreadyUsed => (
                StatusCode::CONFLICT,
                "ALREADY_USED",
                "The invite has already been used".to_string(),
            ),
            LcError::Database(err) => {
                tracing::error!(target: "lc.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            LcError::MediaTransport(err) => {
                tracing::error!(target: "lc.media_transport", error = %err, "Media transport call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "MEDIA_TRANSPORT_ERROR",
                    "The media service is unavailable".to_string(),
                )
            }
            LcError::Notification(err) => {
                tracing::error!(target: "lc.notifier", error = %err, "Notification channel failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            LcError::Internal(err) => {
                tracing::error!(target: "lc.internal", error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Convert sqlx errors to LcError
impl From<sqlx::Error> for LcError {
    fn from(err: sqlx::Error) -> Self {
        LcError::Database(err.to_string())
    }
}

/// Convert reqwest errors to LcError
impl From<reqwest::Error> for LcError {
    fn from(err: reqwest::Error) -> Self {
        LcError::MediaTransport(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display() {
        assert_eq!(
            LcError::NotFound("session".to_string()).to_string(),
            "Not found: session"
        );
        assert_eq!(LcError::Expired.to_string(), "Invite expired");
        assert_eq!(LcError::AlreadyUsed.to_string(), "Invite already used");
        assert_eq!(
            LcError::MediaTransport("timeout".to_string()).to_string(),
            "Media transport error: timeout"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(LcError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(LcError::Unauthorized("x".to_string()).status_code(), 401);
        assert_eq!(LcError::Forbidden("x".to_string()).status_code(), 403);
        assert_eq!(LcError::Validation("x".to_string()).status_code(), 400);
        assert_eq!(LcError::Conflict("x".to_string()).status_code(), 409);
        assert_eq!(LcError::Expired.status_code(), 410);
        assert_eq!(LcError::AlreadyUsed.status_code(), 409);
        assert_eq!(LcError::Database("x".to_string()).status_code(), 500);
        assert_eq!(LcError::MediaTransport("x".to_string()).status_code(), 502);
        assert_eq!(LcError::Notification("x".to_string()).status_code(), 500);
        assert_eq!(LcError::Internal("x".to_string()).status_code(), 500);
    }

    #[test]
    fn test_is_upstream() {
        assert!(LcError::Database("x".to_string()).is_upstream());
        assert!(LcError::MediaTransport("x".to_string()).is_upstream());
        assert!(!LcError::Forbidden("x".to_string()).is_upstream());
        assert!(!LcError::Expired.is_upstream());
    }

    #[tokio::test]
    async fn test_into_response_forbidden_keeps_reason() {
        let response = LcError::Forbidden("only the host may invite".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "FORBIDDEN");
        assert_eq!(body["error"]["message"], "only the host may invite");
    }

    #[tokio::test]
    async fn test_into_response_hides_database_details() {
        let response =
            LcError::Database("password authentication failed for user lc".to_string())
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "DATABASE_ERROR");
        assert!(!body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("password"));
    }

    #[tokio::test]
    async fn test_into_response_media_transport_is_bad_gateway() {
        let response = LcError::MediaTransport("connection refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "MEDIA_TRANSPORT_ERROR");
    }

    #[tokio::test]
    async fn test_into_response_expired_is_gone() {
        let response = LcError::Expired.into_response();
        assert_eq!(response.status(), StatusCode::GONE);
    }
}
