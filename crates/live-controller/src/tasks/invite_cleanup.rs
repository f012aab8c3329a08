//! Expired invite cleanup background task.
//!
//! Purges invites that expired (past the clock-skew grace) without ever
//! being consumed. Consumed invites are kept; they carry the replay cache.

use crate::config::Config;
use crate::observability::metrics;
use crate::services::InviteLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Configuration for the invite cleanup task.
#[derive(Debug, Clone)]
pub struct InviteCleanupConfig {
    pub check_interval: Duration,
    pub batch_size: u64,
}

impl Default for InviteCleanupConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(600),
            batch_size: 500,
        }
    }
}

impl InviteCleanupConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval: Duration::from_secs(config.invite_sweep_interval_seconds),
            batch_size: config.sweep_batch_size,
        }
    }
}

/// Run the invite cleanup loop until `cancel_token` fires.
#[instrument(skip_all, name = "lc.task.invite_cleanup")]
pub async fn start_invite_cleanup(
    ledger: Arc<InviteLedger>,
    config: InviteCleanupConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "lc.task.invite_cleanup",
        check_interval_seconds = config.check_interval.as_secs(),
        batch_size = config.batch_size,
        "Starting invite cleanup task"
    );

    let mut interval = tokio::time::interval(config.check_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_cleanup(&ledger, &config).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "lc.task.invite_cleanup",
                    "Invite cleanup task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "lc.task.invite_cleanup", "Invite cleanup task stopped");
}

pub(crate) async fn run_cleanup(ledger: &InviteLedger, config: &InviteCleanupConfig) {
    match ledger.purge_expired(config.batch_size).await {
        Ok(count) => {
            if count > 0 {
                info!(
                    target: "lc.task.invite_cleanup",
                    deleted_count = count,
                    "Purged expired invites"
                );
            }
            metrics::record_sweep_deleted("invites", count);
        }
        Err(e) => {
            error!(
                target: "lc.task.invite_cleanup",
                error = %e,
                "Failed to purge expired invites"
            );
            metrics::record_sweep_failure("invites");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{RegistryConfig, SessionRegistry};
    use crate::models::Invite;
    use crate::repositories::mock::InMemoryStore;
    use crate::services::media_transport::mock::MockMediaTransport;
    use crate::services::notifier::mock::RecordingNotifier;
    use crate::services::InviteConfig;
    use chrono::Utc;
    use common::types::{SessionId, UserId};

    fn invite(code: &str, expires_in: chrono::Duration) -> Invite {
        let now = Utc::now();
        Invite {
            code: code.to_string(),
            session_id: SessionId::new("e1:h1:1"),
            issued_by: UserId::new("h1"),
            expires_at: now + expires_in,
            consumed_at: None,
            consumed_by: None,
            cached_credential: None,
            cached_credential_at: None,
            created_at: now,
        }
    }

    fn ledger(store: Arc<InMemoryStore>) -> InviteLedger {
        let (registry, _task) = SessionRegistry::spawn(
            RegistryConfig::default(),
            Arc::new(RecordingNotifier::new()),
            CancellationToken::new(),
        );
        InviteLedger::new(
            store,
            Arc::new(MockMediaTransport::new()),
            registry,
            InviteConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_run_cleanup_purges_only_expired() {
        let store = Arc::new(
            InMemoryStore::new()
                .with_invite(invite("expired-a", chrono::Duration::hours(-1)))
                .with_invite(invite("expired-b", chrono::Duration::hours(-3)))
                .with_invite(invite("inside-skew", chrono::Duration::seconds(-30)))
                .with_invite(invite("live", chrono::Duration::minutes(10))),
        );
        let ledger = ledger(store.clone());

        run_cleanup(&ledger, &InviteCleanupConfig::default()).await;

        assert_eq!(store.invite_count(), 2);
        assert!(store.invite("inside-skew").is_some());
        assert!(store.invite("live").is_some());
    }

    #[tokio::test]
    async fn test_run_cleanup_swallows_store_errors() {
        let store = Arc::new(
            InMemoryStore::new().with_invite(invite("expired", chrono::Duration::hours(-1))),
        );
        let ledger = ledger(store.clone());
        store.set_failing(true);

        run_cleanup(&ledger, &InviteCleanupConfig::default()).await;

        store.set_failing(false);
        assert_eq!(store.invite_count(), 1);
    }
}
