//! Common identifier types for Live Stage components.
//!
//! Identifiers are opaque strings minted by other systems (the event service,
//! the identity provider, the media transport). Wrapping them keeps an event id
//! from being passed where a user id is expected.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is empty (never valid on the wire).
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Identifier of the scheduled event a broadcast belongs to.
    EventId
}

string_id! {
    /// Identifier of an authenticated user (hosts, co-hosts, guests).
    UserId
}

string_id! {
    /// Identifier of one live session, unique across restarts of the same host.
    SessionId
}

string_id! {
    /// Opaque handle of a stage resource in the media transport service.
    StageRef
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_display_is_raw_value() {
        assert_eq!(EventId::new("evt-1").to_string(), "evt-1");
        assert_eq!(StageRef::from("stage-9").as_str(), "stage-9");
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&UserId::new("user-1")).unwrap();
        assert_eq!(json, "\"user-1\"");

        let parsed: SessionId = serde_json::from_str("\"s-1\"").unwrap();
        assert_eq!(parsed, SessionId::new("s-1"));
    }

    #[test]
    fn test_map_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(SessionId::new("s-1"), 1);
        assert_eq!(map.get("s-1"), Some(&1));
    }

    #[test]
    fn test_is_empty() {
        assert!(UserId::new("").is_empty());
        assert!(!UserId::new("u").is_empty());
    }
}
