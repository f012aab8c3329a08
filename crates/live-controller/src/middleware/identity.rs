//! Caller identity extractor.
//!
//! Authentication happens upstream: the gateway in front of this service
//! verifies the user and forwards their id in `x-user-id`. Handlers that need
//! a caller take [`CallerId`]; handlers where an anonymous caller is a valid
//! outcome take `Option<CallerId>`.

use crate::errors::LcError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::types::UserId;
use tracing::debug;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Longest user id accepted from the gateway.
const MAX_USER_ID_LEN: usize = 256;

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = LcError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= MAX_USER_ID_LEN)
            .ok_or_else(|| {
                debug!(target: "lc.middleware.identity", "Missing or malformed caller identity");
                LcError::Unauthorized("missing caller identity".to_string())
            })?;

        Ok(CallerId(UserId::new(value)))
    }
}
