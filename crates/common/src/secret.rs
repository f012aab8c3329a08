//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] types. Use them for connection strings that may
//! carry passwords, upstream API keys, and anything else that must never show
//! up in `{:?}` output or a tracing field.
//!
//! Invite codes and participant credentials are bearer capabilities too, but
//! they have to travel back to clients as plain strings. For those, log only
//! [`log_prefix`] of the value.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct UpstreamAuth {
//!     base_url: String,
//!     api_key: SecretString,
//! }
//!
//! let auth = UpstreamAuth {
//!     base_url: "http://media:8090".to_string(),
//!     api_key: SecretString::from("sk-live-123"),
//! };
//!
//! assert!(!format!("{auth:?}").contains("sk-live-123"));
//! assert_eq!(auth.api_key.expose_secret(), "sk-live-123");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Number of characters of a bearer value that may appear in logs.
pub const LOG_PREFIX_LEN: usize = 8;

/// Returns a log-safe prefix of a bearer value (invite code, credential).
///
/// Values shorter than [`LOG_PREFIX_LEN`] are fully masked.
#[must_use]
pub fn log_prefix(value: &str) -> String {
    match value.char_indices().nth(LOG_PREFIX_LEN) {
        Some((idx, _)) => format!("{}…", value.get(..idx).unwrap_or_default()),
        None => "[REDACTED]".to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("postgres://lc:hunter2@db/lc");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_deserialize_api_key() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct MediaAuth {
            base_url: String,
            api_key: SecretString,
        }

        let json = r#"{"base_url": "http://media:8090", "api_key": "sk-test"}"#;
        let auth: MediaAuth = serde_json::from_str(json).expect("deserialize");

        assert_eq!(auth.api_key.expose_secret(), "sk-test");
        assert!(!format!("{auth:?}").contains("sk-test"));
    }

    #[test]
    fn test_log_prefix_truncates_long_values() {
        let prefix = log_prefix("abcdefghijklmnop");
        assert_eq!(prefix, "abcdefgh…");
    }

    #[test]
    fn test_log_prefix_masks_short_values() {
        assert_eq!(log_prefix("abc"), "[REDACTED]");
        assert_eq!(log_prefix("abcdefgh"), "[REDACTED]");
        assert_eq!(log_prefix(""), "[REDACTED]");
    }
}
