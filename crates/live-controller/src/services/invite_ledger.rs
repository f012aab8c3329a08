//! Invite Ledger.
//!
//! Issues single-use co-host invites and redeems them.
//!
//! # Redemption
//!
//! `consume` checks the invite in a fixed order (`auth_required`,
//! `not_found`, `used`, `expired`, `session_mismatch`), mints a media
//! credential, and only then marks the invite consumed with a conditional
//! update that succeeds for exactly one caller. A caller that loses that
//! update is told `used`, unless it is the same user retrying inside the
//! replay window, in which case the cached credential is returned again.
//!
//! Outcomes are values ([`PeekResult`], [`ConsumeResult`]), not errors. Only
//! store or registry failures surface as `Err`.
//!
//! # Security
//!
//! - Codes are 24 bytes from the system CSPRNG, hex encoded
//! - Codes and credentials are never logged in full

use crate::actors::SessionRegistryHandle;
use crate::config::{Config, MAX_INVITE_TTL_SECONDS, MIN_INVITE_TTL_SECONDS};
use crate::errors::LcError;
use crate::models::{
    validate_display_name, ConsumeResult, CreatedInvite, Invite, InviteReason, ParticipantRole,
    PeekResult, SessionSummary,
};
use crate::observability::metrics;
use crate::repositories::PersistentStore;
use crate::services::media_transport::{CredentialGrant, MediaTransport};
use chrono::{DateTime, Utc};
use common::secret::log_prefix;
use common::types::{SessionId, StageRef, UserId};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Random bytes per invite code.
const INVITE_CODE_BYTES: usize = 24;

/// Invite timing policy.
#[derive(Debug, Clone)]
pub struct InviteConfig {
    /// TTL used when the issuer does not ask for one.
    pub default_ttl: Duration,

    /// Grace applied past `expires_at` before an invite counts as expired.
    pub clock_skew: Duration,

    /// How long a consumed invite keeps replaying its credential to the
    /// same user.
    pub replay_window: Duration,
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(900),
            clock_skew: Duration::from_secs(90),
            replay_window: Duration::from_secs(120),
        }
    }
}

impl InviteConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_ttl: Duration::from_secs(config.invite_default_ttl_seconds),
            clock_skew: Duration::from_secs(config.invite_clock_skew_seconds),
            replay_window: Duration::from_secs(config.invite_replay_window_seconds),
        }
    }
}

/// Clamp a requested TTL into the allowed range.
pub fn clamp_ttl_seconds(requested: Option<i64>, default_ttl: Duration) -> i64 {
    let min = i64::try_from(MIN_INVITE_TTL_SECONDS).unwrap_or(60);
    let max = i64::try_from(MAX_INVITE_TTL_SECONDS).unwrap_or(3600);
    let default = i64::try_from(default_ttl.as_secs()).unwrap_or(max);
    requested.unwrap_or(default).clamp(min, max)
}

/// Generate an invite code.
///
/// # Errors
///
/// `LcError::Internal` if the system RNG fails.
fn generate_invite_code() -> Result<String, LcError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; INVITE_CODE_BYTES];

    rng.fill(&mut bytes).map_err(|_| {
        tracing::error!(target: "lc.services.invite_ledger", "Failed to generate random bytes");
        LcError::Internal("random generation failed".to_string())
    })?;

    Ok(hex::encode(bytes))
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52))
}

/// Issues, previews and redeems co-host invites.
pub struct InviteLedger {
    store: Arc<dyn PersistentStore>,
    media: Arc<dyn MediaTransport>,
    registry: SessionRegistryHandle,
    config: InviteConfig,
}

impl InviteLedger {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        media: Arc<dyn MediaTransport>,
        registry: SessionRegistryHandle,
        config: InviteConfig,
    ) -> Self {
        Self {
            store,
            media,
            registry,
            config,
        }
    }

    /// Issue an invite to the live session `session_id`.
    ///
    /// # Errors
    ///
    /// - `LcError::NotFound` - the session is not live
    /// - `LcError::Forbidden` - `issuer_id` does not own the session
    /// - `LcError::Database` - the invite could not be stored
    #[instrument(skip_all, fields(session_id = %session_id, issuer_id = %issuer_id))]
    pub async fn create_invite(
        &self,
        session_id: &SessionId,
        issuer_id: &UserId,
        ttl_seconds: Option<i64>,
    ) -> Result<CreatedInvite, LcError> {
        let session = self
            .registry
            .get_session(session_id.clone())
            .await?
            .ok_or_else(|| LcError::NotFound("session".to_string()))?;

        let may_issue = session.is_owned_by(issuer_id)
            && session
                .role_of(issuer_id)
                .map_or(true, |role| role.can_issue_invites());
        if !may_issue {
            return Err(LcError::Forbidden(
                "only the session owner may issue invites".to_string(),
            ));
        }

        let ttl = clamp_ttl_seconds(ttl_seconds, self.config.default_ttl);
        let now = Utc::now();
        let invite = Invite {
            code: generate_invite_code()?,
            session_id: session_id.clone(),
            issued_by: issuer_id.clone(),
            expires_at: now + chrono::Duration::seconds(ttl),
            consumed_at: None,
            consumed_by: None,
            cached_credential: None,
            cached_credential_at: None,
            created_at: now,
        };

        self.store.put_invite(&invite).await?;
        metrics::record_invite_created();

        info!(
            target: "lc.services.invite_ledger",
            code = %log_prefix(&invite.code),
            ttl_seconds = ttl,
            "Invite created"
        );

        Ok(CreatedInvite {
            code: invite.code,
            expires_at: invite.expires_at,
        })
    }

    /// Preview an invite without changing anything.
    ///
    /// # Errors
    ///
    /// Only when the store or the registry cannot be reached.
    #[instrument(skip_all, fields(code = %log_prefix(code)))]
    pub async fn peek(&self, code: &str) -> Result<PeekResult, LcError> {
        let result = self.peek_inner(code).await?;
        let outcome = result.reason.map_or("success", |r| r.as_str());
        metrics::record_invite_outcome("peek", outcome);
        Ok(result)
    }

    async fn peek_inner(&self, code: &str) -> Result<PeekResult, LcError> {
        let Some(invite) = self.store.get_invite(code).await? else {
            return Ok(PeekResult::invalid(InviteReason::NotFound));
        };

        if invite.is_consumed() {
            return Ok(PeekResult::invalid(InviteReason::Used));
        }
        if invite.is_expired_at(Utc::now(), chrono_duration(self.config.clock_skew)) {
            return Ok(PeekResult::invalid(InviteReason::Expired));
        }

        match self.registry.get_session(invite.session_id.clone()).await? {
            Some(session) => Ok(PeekResult {
                valid: true,
                reason: None,
                session: Some(SessionSummary::from(&session)),
                expires_at: Some(invite.expires_at),
            }),
            None => Ok(PeekResult::invalid(InviteReason::SessionMismatch)),
        }
    }

    /// Redeem an invite for `user_id`, joining them to the session as a
    /// co-host.
    ///
    /// `stage_ref`, when given, must be the stage of the invite's session.
    ///
    /// # Errors
    ///
    /// - `LcError::Validation` - `display_name` is malformed
    /// - `LcError::Database` / `LcError::Internal` - store or registry failure
    #[instrument(skip_all, fields(code = %log_prefix(code)))]
    pub async fn consume(
        &self,
        code: &str,
        user_id: Option<&UserId>,
        display_name: &str,
        stage_ref: Option<&StageRef>,
    ) -> Result<ConsumeResult, LcError> {
        let start = Instant::now();
        let result = self
            .consume_inner(code, user_id, display_name, stage_ref)
            .await;
        metrics::record_invite_consume_duration(start.elapsed());

        if let Ok(outcome) = &result {
            let label = match outcome.reason {
                Some(reason) => reason.as_str(),
                None if outcome.replayed => "replay",
                None => "success",
            };
            metrics::record_invite_outcome("consume", label);
        }
        result
    }

    async fn consume_inner(
        &self,
        code: &str,
        user_id: Option<&UserId>,
        display_name: &str,
        stage_ref: Option<&StageRef>,
    ) -> Result<ConsumeResult, LcError> {
        let Some(user_id) = user_id.filter(|u| !u.is_empty()) else {
            return Ok(ConsumeResult::failed(InviteReason::AuthRequired));
        };
        validate_display_name(display_name)?;

        let Some(invite) = self.store.get_invite(code).await? else {
            return Ok(ConsumeResult::failed(InviteReason::NotFound));
        };

        let now = Utc::now();
        if invite.is_consumed() {
            return self.replay_or_used(&invite, user_id, now).await;
        }
        if invite.is_expired_at(now, chrono_duration(self.config.clock_skew)) {
            return Ok(ConsumeResult::failed(InviteReason::Expired));
        }

        let session = match self.registry.get_session(invite.session_id.clone()).await? {
            Some(session) if stage_ref.map_or(true, |r| r == &session.stage_ref) => session,
            _ => return Ok(ConsumeResult::failed(InviteReason::SessionMismatch)),
        };

        let role = ParticipantRole::Cohost;
        let grant = CredentialGrant {
            stage_ref: session.stage_ref.clone(),
            session_id: session.session_id.clone(),
            participant_id: user_id.clone(),
            capabilities: role.media_capabilities(),
            role,
        };
        let credential = match self.media.mint_participant_credential(&grant).await {
            Ok(credential) => credential,
            Err(e) => {
                // Invite stays unconsumed so the guest can retry.
                warn!(
                    target: "lc.services.invite_ledger",
                    session_id = %session.session_id,
                    error = %e,
                    "Credential mint failed"
                );
                return Ok(ConsumeResult::failed(InviteReason::SessionMismatch));
            }
        };

        let marked = self
            .store
            .mark_invite_consumed(code, user_id, &credential, now)
            .await?;
        if !marked {
            // Someone else redeemed it between our read and our write.
            return match self.store.get_invite(code).await? {
                Some(current) => self.replay_or_used(&current, user_id, now).await,
                None => Ok(ConsumeResult::failed(InviteReason::Used)),
            };
        }

        let update = match self
            .registry
            .add_participant(
                session.session_id.clone(),
                user_id.clone(),
                display_name.to_string(),
                role,
            )
            .await
        {
            Ok(update) => update,
            Err(LcError::NotFound(_)) => {
                warn!(
                    target: "lc.services.invite_ledger",
                    session_id = %session.session_id,
                    "Session ended during invite redemption"
                );
                return Ok(ConsumeResult::failed(InviteReason::SessionMismatch));
            }
            Err(e) => return Err(e),
        };

        info!(
            target: "lc.services.invite_ledger",
            session_id = %session.session_id,
            participant_id = %user_id,
            version = update.version,
            "Invite consumed"
        );

        Ok(ConsumeResult {
            success: true,
            reason: None,
            credential: Some(credential),
            session_id: Some(session.session_id),
            stage_ref: Some(session.stage_ref),
            roster: Some(update.roster),
            version: Some(update.version),
            replayed: false,
        })
    }

    /// Outcome for an already consumed invite: the cached credential for the
    /// same user inside the replay window, `used` otherwise. A replay for a
    /// session that has since retired is a `session_mismatch`.
    async fn replay_or_used(
        &self,
        invite: &Invite,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<ConsumeResult, LcError> {
        let window = chrono_duration(self.config.replay_window);
        let fresh = invite
            .cached_credential_at
            .is_some_and(|at| now - at <= window);

        let credential = match (&invite.consumed_by, &invite.cached_credential) {
            (Some(by), Some(credential)) if by == user_id && fresh => credential.clone(),
            _ => return Ok(ConsumeResult::failed(InviteReason::Used)),
        };

        // A credential for a retired session is useless to the caller.
        let Some(session) = self.registry.get_session(invite.session_id.clone()).await? else {
            return Ok(ConsumeResult::failed(InviteReason::SessionMismatch));
        };

        info!(
            target: "lc.services.invite_ledger",
            session_id = %invite.session_id,
            participant_id = %user_id,
            "Replaying cached invite credential"
        );

        Ok(ConsumeResult {
            success: true,
            reason: None,
            credential: Some(credential),
            session_id: Some(invite.session_id.clone()),
            stage_ref: Some(session.stage_ref),
            version: Some(session.version),
            roster: Some(session.roster),
            replayed: true,
        })
    }

    /// Delete an invite. Only its issuer may do so.
    ///
    /// # Errors
    ///
    /// - `LcError::NotFound` - no such invite
    /// - `LcError::Forbidden` - `caller_id` did not issue it
    #[instrument(skip_all, fields(code = %log_prefix(code), caller_id = %caller_id))]
    pub async fn revoke(&self, code: &str, caller_id: &UserId) -> Result<(), LcError> {
        let invite = self
            .store
            .get_invite(code)
            .await?
            .ok_or_else(|| LcError::NotFound("invite".to_string()))?;

        if &invite.issued_by != caller_id {
            return Err(LcError::Forbidden(
                "only the issuer may revoke an invite".to_string(),
            ));
        }

        self.store.delete_invite(code).await?;
        info!(target: "lc.services.invite_ledger", "Invite revoked");
        Ok(())
    }

    /// Delete up to `batch_size` invites that expired without being
    /// consumed. Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// `LcError::Database` if the store delete fails.
    pub async fn purge_expired(&self, batch_size: u64) -> Result<u64, LcError> {
        self.store
            .delete_expired_invites(self.config.clock_skew, batch_size)
            .await
    }
}
