//! Live Controller models.
//!
//! Domain types shared by the stage coordinator, the session registry and
//! the invite ledger, plus the request/response bodies of the HTTP surface.

use chrono::{DateTime, Utc};
use common::types::{EventId, SessionId, StageRef, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::LcError;

/// Maximum length of a single display metadata tag.
pub const MAX_METADATA_TAG_LENGTH: usize = 64;

/// Maximum display name length for roster entries.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 100;

// ============================================================================
// Roles and capabilities
// ============================================================================

/// Role of a participant within a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// Started the session. May stop it and issue invites.
    Host,

    /// Joined through an invite. Publishes but holds no management rights.
    Cohost,

    /// Added by the host directly. No management rights.
    Guest,
}

impl ParticipantRole {
    /// Returns the string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Host => "host",
            ParticipantRole::Cohost => "cohost",
            ParticipantRole::Guest => "guest",
        }
    }

    /// Whether this role may stop the session.
    pub fn can_stop_session(&self) -> bool {
        matches!(self, ParticipantRole::Host)
    }

    /// Whether this role may mint co-host invites.
    pub fn can_issue_invites(&self) -> bool {
        matches!(self, ParticipantRole::Host)
    }

    /// Whether the participant survives the non-host roster sweep.
    pub fn exempt_from_roster_sweep(&self) -> bool {
        matches!(self, ParticipantRole::Host)
    }

    /// Media capabilities requested when minting a credential for this role.
    pub fn media_capabilities(&self) -> Capabilities {
        match self {
            ParticipantRole::Host | ParticipantRole::Cohost => Capabilities::PublishSubscribe,
            ParticipantRole::Guest => Capabilities::SubscribeOnly,
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability set granted by a media transport credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capabilities {
    PublishSubscribe,
    SubscribeOnly,
}

impl Capabilities {
    /// Capability names as understood by the media transport service.
    pub fn as_grants(&self) -> &'static [&'static str] {
        match self {
            Capabilities::PublishSubscribe => &["publish", "subscribe"],
            Capabilities::SubscribeOnly => &["subscribe"],
        }
    }
}

/// Short-lived media credential scoped to one stage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCredential {
    /// Opaque bearer token handed to the client.
    pub token: String,

    /// Expiry reported by the media transport, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for ParticipantCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticipantCredential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Display metadata attached to a session. Opaque to the controller apart
/// from length and character validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perspective: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_tone: Option<String>,
}

impl SessionMetadata {
    /// Validate tag shapes.
    ///
    /// # Errors
    ///
    /// Returns `LcError::Validation` naming the offending tag.
    pub fn validate(&self) -> Result<(), LcError> {
        for (name, value) in [
            ("perspective", &self.perspective),
            ("mode", &self.mode),
            ("content_tone", &self.content_tone),
        ] {
            let Some(value) = value else { continue };

            if value.trim().is_empty() {
                return Err(LcError::Validation(format!("{name} must not be blank")));
            }
            if value.chars().count() > MAX_METADATA_TAG_LENGTH {
                return Err(LcError::Validation(format!(
                    "{name} must be at most {MAX_METADATA_TAG_LENGTH} characters"
                )));
            }
            if value.chars().any(char::is_control) {
                return Err(LcError::Validation(format!(
                    "{name} must not contain control characters"
                )));
            }
        }
        Ok(())
    }
}

/// Validate a roster display name.
///
/// # Errors
///
/// Returns `LcError::Validation` when blank or too long.
pub fn validate_display_name(display_name: &str) -> Result<(), LcError> {
    let trimmed = display_name.trim();
    if trimmed.is_empty() {
        return Err(LcError::Validation(
            "display_name must not be blank".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(LcError::Validation(format!(
            "display_name must be at most {MAX_DISPLAY_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

/// One participant on a session roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub participant_id: UserId,
    pub display_name: String,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
}

/// Snapshot of a live session as held by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSession {
    pub session_id: SessionId,
    pub event_id: EventId,
    pub host_user_id: UserId,
    pub host_display_name: String,
    pub metadata: SessionMetadata,
    pub stage_ref: StageRef,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,

    /// Starts at 1, bumped once per effective roster mutation.
    pub version: u64,

    pub roster: Vec<RosterEntry>,
}

impl LiveSession {
    /// Whether `user_id` owns this session.
    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.host_user_id == user_id
    }

    /// Role of `user_id` on the roster, if present.
    pub fn role_of(&self, user_id: &UserId) -> Option<ParticipantRole> {
        self.roster
            .iter()
            .find(|entry| &entry.participant_id == user_id)
            .map(|entry| entry.role)
    }
}

/// Roster state after an add/remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterUpdate {
    pub session_id: SessionId,
    pub version: u64,
    pub roster: Vec<RosterEntry>,

    /// False when the call was a no-op (duplicate add, absent remove).
    pub changed: bool,

    /// True when the mutation emptied the roster and retired the session.
    pub retired: bool,
}

/// Event published on the notification channel after every roster mutation
/// and once more, with `ended = true`, when a session retires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterChangedEvent {
    pub event_id: EventId,
    pub session_id: SessionId,

    /// Session owner; with `event_id` this names the stage lease.
    pub host_user_id: UserId,
    pub stage_ref: StageRef,
    pub version: u64,
    pub roster: Vec<RosterEntry>,
    pub ended: bool,
}

/// One logical broadcast for listeners: every live session sharing a stage,
/// merged into a single entry.
#[derive(Debug, Clone, Serialize)]
pub struct LiveBroadcast {
    pub stage_ref: StageRef,
    pub event_id: EventId,

    /// Sessions on this stage, earliest first.
    pub session_ids: Vec<SessionId>,

    /// Host of the earliest session on the stage.
    pub host_user_id: UserId,
    pub host_display_name: String,
    pub metadata: SessionMetadata,
    pub started_at: DateTime<Utc>,

    /// Highest version among the merged sessions.
    pub version: u64,

    /// Union of the merged rosters, unique by participant.
    pub roster: Vec<RosterEntry>,
}

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    Stopped,
    Expired,
    EmptyRoster,
    Disconnected,
}

impl RetireReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetireReason::Stopped => "stopped",
            RetireReason::Expired => "expired",
            RetireReason::EmptyRoster => "empty_roster",
            RetireReason::Disconnected => "disconnected",
        }
    }
}

/// Registry occupancy, reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStatus {
    pub live_sessions: usize,
    pub roster_entries: usize,
}

// ============================================================================
// Stage leases
// ============================================================================

/// Durable binding between an (event, host) pair and a media stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageLease {
    pub stage_key: String,
    pub stage_ref: StageRef,
    pub event_id: EventId,
    pub host_user_id: UserId,
    pub bound_session_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
}

impl StageLease {
    /// Deterministic lease key for an (event, host) pair.
    ///
    /// The event id is length-prefixed so ids containing ':' cannot collide.
    pub fn key_for(event_id: &EventId, host_user_id: &UserId) -> String {
        format!(
            "{}:{}:{}",
            event_id.as_str().len(),
            event_id,
            host_user_id
        )
    }

    /// A fresh, unbound lease for a newly created stage.
    pub fn new(
        event_id: EventId,
        host_user_id: UserId,
        stage_ref: StageRef,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_key: Self::key_for(&event_id, &host_user_id),
            stage_ref,
            event_id,
            host_user_id,
            bound_session_id: None,
            created_at: now,
            last_touched_at: now,
        }
    }
}

// ============================================================================
// Invites
// ============================================================================

/// Single-use co-host invite.
#[derive(Clone, PartialEq, Eq)]
pub struct Invite {
    pub code: String,
    pub session_id: SessionId,
    pub issued_by: UserId,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub consumed_by: Option<UserId>,
    pub cached_credential: Option<ParticipantCredential>,
    pub cached_credential_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invite {
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// Whether the invite is past its expiry plus `skew`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        now > self.expires_at + skew
    }
}

impl fmt::Debug for Invite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invite")
            .field("code", &common::secret::log_prefix(&self.code))
            .field("session_id", &self.session_id)
            .field("issued_by", &self.issued_by)
            .field("expires_at", &self.expires_at)
            .field("consumed_at", &self.consumed_at)
            .field("consumed_by", &self.consumed_by)
            .field("cached_credential", &self.cached_credential)
            .field("cached_credential_at", &self.cached_credential_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Why an invite cannot be (or was not) redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteReason {
    NotFound,
    Expired,
    Used,
    SessionMismatch,
    AuthRequired,
}

impl InviteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteReason::NotFound => "not_found",
            InviteReason::Expired => "expired",
            InviteReason::Used => "used",
            InviteReason::SessionMismatch => "session_mismatch",
            InviteReason::AuthRequired => "auth_required",
        }
    }
}

/// Terminal error equivalent of an invite outcome, used by the HTTP layer to
/// pick a status code.
impl From<InviteReason> for LcError {
    fn from(reason: InviteReason) -> Self {
        match reason {
            InviteReason::NotFound => LcError::NotFound("invite".to_string()),
            InviteReason::Expired => LcError::Expired,
            InviteReason::Used => LcError::AlreadyUsed,
            InviteReason::SessionMismatch => {
                LcError::Conflict("the broadcast for this invite has ended".to_string())
            }
            InviteReason::AuthRequired => {
                LcError::Unauthorized("sign in to accept this invite".to_string())
            }
        }
    }
}

/// Public view of the session an invite points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub event_id: EventId,
    pub host_user_id: UserId,
    pub host_display_name: String,
    pub metadata: SessionMetadata,
    pub participant_count: usize,
}

impl From<&LiveSession> for SessionSummary {
    fn from(session: &LiveSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            event_id: session.event_id.clone(),
            host_user_id: session.host_user_id.clone(),
            host_display_name: session.host_display_name.clone(),
            metadata: session.metadata.clone(),
            participant_count: session.roster.len(),
        }
    }
}

/// Freshly issued invite.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedInvite {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Read-only invite preview.
#[derive(Debug, Clone, Serialize)]
pub struct PeekResult {
    pub valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InviteReason>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PeekResult {
    pub fn invalid(reason: InviteReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            session: None,
            expires_at: None,
        }
    }
}

/// Outcome of an invite redemption.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeResult {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InviteReason>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<ParticipantCredential>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_ref: Option<StageRef>,

    /// Roster after the redemption, when the session is still live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roster: Option<Vec<RosterEntry>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    /// True when a cached credential was returned for a retried redemption.
    pub replayed: bool,
}

impl ConsumeResult {
    pub fn failed(reason: InviteReason) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            credential: None,
            session_id: None,
            stage_ref: None,
            roster: None,
            version: None,
            replayed: false,
        }
    }
}

// ============================================================================
// HTTP API models
// ============================================================================

/// Body of `POST /v1/events/{event_id}/sessions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartSessionRequest {
    pub display_name: String,

    #[serde(default)]
    pub metadata: SessionMetadata,
}

/// Response of a session start.
#[derive(Debug, Clone, Serialize)]
pub struct StartSessionResponse {
    pub session_id: SessionId,
    pub stage_ref: StageRef,
    pub version: u64,
    pub roster: Vec<RosterEntry>,
}

/// Body of `POST /v1/sessions/{session_id}/invites`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateInviteRequest {
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

/// Body of `POST /v1/invites/{code}/consume`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumeInviteRequest {
    pub display_name: String,

    /// Stage the client expects to join. Must match the session's stage.
    #[serde(default)]
    pub stage_ref: Option<StageRef>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy".
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    pub live_sessions: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        assert!(ParticipantRole::Host.can_stop_session());
        assert!(ParticipantRole::Host.can_issue_invites());
        assert!(!ParticipantRole::Cohost.can_stop_session());
        assert!(!ParticipantRole::Cohost.can_issue_invites());
        assert!(!ParticipantRole::Guest.can_issue_invites());

        assert_eq!(
            ParticipantRole::Cohost.media_capabilities(),
            Capabilities::PublishSubscribe
        );
        assert_eq!(
            ParticipantRole::Guest.media_capabilities(),
            Capabilities::SubscribeOnly
        );
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&ParticipantRole::Cohost).unwrap();
        assert_eq!(json, "\"cohost\"");

        let role: ParticipantRole = serde_json::from_str("\"host\"").unwrap();
        assert_eq!(role, ParticipantRole::Host);
    }

    #[test]
    fn test_capability_grants() {
        assert_eq!(
            Capabilities::PublishSubscribe.as_grants(),
            &["publish", "subscribe"]
        );
        assert_eq!(Capabilities::SubscribeOnly.as_grants(), &["subscribe"]);
    }

    #[test]
    fn test_stage_key_is_deterministic_and_unambiguous() {
        let a = StageLease::key_for(&EventId::new("e:1"), &UserId::new("h"));
        let b = StageLease::key_for(&EventId::new("e"), &UserId::new("1:h"));

        assert_eq!(a, StageLease::key_for(&EventId::new("e:1"), &UserId::new("h")));
        assert_ne!(a, b);
    }

    #[test]
    fn test_metadata_validation() {
        assert!(SessionMetadata::default().validate().is_ok());

        let ok = SessionMetadata {
            perspective: Some("home".to_string()),
            mode: Some("play-by-play".to_string()),
            content_tone: None,
        };
        assert!(ok.validate().is_ok());

        let blank = SessionMetadata {
            mode: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(matches!(blank.validate(), Err(LcError::Validation(msg)) if msg.contains("mode")));

        let long = SessionMetadata {
            perspective: Some("x".repeat(MAX_METADATA_TAG_LENGTH + 1)),
            ..Default::default()
        };
        assert!(matches!(long.validate(), Err(LcError::Validation(_))));

        let control = SessionMetadata {
            content_tone: Some("calm\u{7}".to_string()),
            ..Default::default()
        };
        assert!(matches!(control.validate(), Err(LcError::Validation(_))));
    }

    #[test]
    fn test_metadata_rejects_unknown_fields() {
        let result: Result<SessionMetadata, _> =
            serde_json::from_str(r#"{"perspective":"home","color":"red"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_display_name_validation() {
        assert!(validate_display_name("Alex").is_ok());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"n".repeat(MAX_DISPLAY_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_invite_expiry_applies_skew() {
        let now = Utc::now();
        let invite = Invite {
            code: "c".repeat(48),
            session_id: SessionId::new("s"),
            issued_by: UserId::new("h"),
            expires_at: now - chrono::Duration::seconds(60),
            consumed_at: None,
            consumed_by: None,
            cached_credential: None,
            cached_credential_at: None,
            created_at: now,
        };

        assert!(!invite.is_expired_at(now, chrono::Duration::seconds(90)));
        assert!(invite.is_expired_at(now, chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let credential = ParticipantCredential {
            token: "media-token-abcdef".to_string(),
            expires_at: None,
        };
        let invite = Invite {
            code: "0123456789abcdef0123".to_string(),
            session_id: SessionId::new("s"),
            issued_by: UserId::new("h"),
            expires_at: Utc::now(),
            consumed_at: None,
            consumed_by: None,
            cached_credential: Some(credential),
            cached_credential_at: None,
            created_at: Utc::now(),
        };

        let debug_output = format!("{invite:?}");
        assert!(!debug_output.contains("media-token-abcdef"));
        assert!(!debug_output.contains("0123456789abcdef0123"));
        assert!(debug_output.contains("01234567…"));
    }

    #[test]
    fn test_invite_reason_serialization() {
        let json = serde_json::to_string(&InviteReason::SessionMismatch).unwrap();
        assert_eq!(json, "\"session_mismatch\"");
        assert_eq!(InviteReason::AuthRequired.as_str(), "auth_required");
    }

    #[test]
    fn test_invite_reason_status_mapping() {
        assert_eq!(LcError::from(InviteReason::NotFound).status_code(), 404);
        assert_eq!(LcError::from(InviteReason::Expired).status_code(), 410);
        assert_eq!(LcError::from(InviteReason::Used).status_code(), 409);
        assert_eq!(LcError::from(InviteReason::SessionMismatch).status_code(), 409);
        assert_eq!(LcError::from(InviteReason::AuthRequired).status_code(), 401);
    }

    #[test]
    fn test_peek_result_omits_empty_fields() {
        let json = serde_json::to_string(&PeekResult::invalid(InviteReason::Expired)).unwrap();
        assert_eq!(json, r#"{"valid":false,"reason":"expired"}"#);
    }

    #[test]
    fn test_consume_result_failed_shape() {
        let json = serde_json::to_value(ConsumeResult::failed(InviteReason::Used)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["reason"], "used");
        assert!(json.get("credential").is_none());
        assert_eq!(json["replayed"], false);
    }
}
