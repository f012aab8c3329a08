//! Middleware for the Live Controller.
//!
//! # Components
//!
//! - `http_metrics` - request metrics for every response
//! - `identity` - caller identity forwarded by the authenticating gateway

pub mod http_metrics;
pub mod identity;

pub use http_metrics::http_metrics_middleware;
pub use identity::{CallerId, USER_ID_HEADER};
