//! Stage lease cleanup background task.
//!
//! Every tick deletes one bounded batch of leases whose `last_touched_at` is
//! older than the threshold, then deletes their remote stages.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token fires. An in-flight sweep runs
//! to completion first.

use crate::config::Config;
use crate::observability::metrics;
use crate::services::StageCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Configuration for the lease cleanup task.
#[derive(Debug, Clone)]
pub struct LeaseCleanupConfig {
    pub check_interval: Duration,
    /// Leases untouched for this many hours are stale.
    pub max_age_hours: u64,
    pub batch_size: u64,
}

impl Default for LeaseCleanupConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(3600),
            max_age_hours: 24,
            batch_size: 500,
        }
    }
}

impl LeaseCleanupConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval: Duration::from_secs(config.lease_sweep_interval_seconds),
            max_age_hours: config.lease_max_age_hours,
            batch_size: config.sweep_batch_size,
        }
    }
}

/// Run the lease cleanup loop until `cancel_token` fires.
#[instrument(skip_all, name = "lc.task.lease_cleanup")]
pub async fn start_lease_cleanup(
    coordinator: Arc<StageCoordinator>,
    config: LeaseCleanupConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "lc.task.lease_cleanup",
        check_interval_seconds = config.check_interval.as_secs(),
        max_age_hours = config.max_age_hours,
        batch_size = config.batch_size,
        "Starting lease cleanup task"
    );

    let mut interval = tokio::time::interval(config.check_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_cleanup(&coordinator, &config).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "lc.task.lease_cleanup",
                    "Lease cleanup task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "lc.task.lease_cleanup", "Lease cleanup task stopped");
}

/// One sweep. Failures are logged and counted, never propagated.
pub(crate) async fn run_cleanup(coordinator: &StageCoordinator, config: &LeaseCleanupConfig) {
    match coordinator
        .sweep_stale_leases(config.max_age_hours, config.batch_size)
        .await
    {
        Ok(removed) => {
            if !removed.is_empty() {
                info!(
                    target: "lc.task.lease_cleanup",
                    removed = removed.len(),
                    max_age_hours = config.max_age_hours,
                    "Deleted stale stage leases"
                );
            }
            metrics::record_sweep_deleted("leases", removed.len() as u64);
        }
        Err(e) => {
            error!(
                target: "lc.task.lease_cleanup",
                error = %e,
                "Failed to sweep stale stage leases"
            );
            metrics::record_sweep_failure("leases");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::StageLease;
    use crate::repositories::mock::InMemoryStore;
    use crate::services::media_transport::mock::MockMediaTransport;
    use chrono::Utc;
    use common::types::{EventId, StageRef, UserId};

    fn stale_lease(host: &str) -> StageLease {
        StageLease::new(
            EventId::new("e1"),
            UserId::new(host),
            StageRef::new(format!("stage-{host}")),
            Utc::now() - chrono::Duration::hours(48),
        )
    }

    #[test]
    fn test_default_config() {
        let config = LeaseCleanupConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(3600));
        assert_eq!(config.max_age_hours, 24);
        assert_eq!(config.batch_size, 500);
    }

    #[tokio::test]
    async fn test_run_cleanup_respects_batch_size() {
        let store = Arc::new(
            InMemoryStore::new()
                .with_lease(stale_lease("a"))
                .with_lease(stale_lease("b"))
                .with_lease(stale_lease("c")),
        );
        let media = Arc::new(MockMediaTransport::new());
        let coordinator = StageCoordinator::new(store.clone(), media.clone());
        let config = LeaseCleanupConfig {
            batch_size: 2,
            ..LeaseCleanupConfig::default()
        };

        run_cleanup(&coordinator, &config).await;
        assert_eq!(store.lease_count(), 1);

        run_cleanup(&coordinator, &config).await;
        assert_eq!(store.lease_count(), 0);
        assert_eq!(media.delete_calls(), 3);
    }

    #[tokio::test]
    async fn test_run_cleanup_swallows_store_errors() {
        let store = Arc::new(InMemoryStore::new().with_lease(stale_lease("a")));
        let media = Arc::new(MockMediaTransport::new());
        let coordinator = StageCoordinator::new(store.clone(), media.clone());
        store.set_failing(true);

        run_cleanup(&coordinator, &LeaseCleanupConfig::default()).await;

        assert_eq!(media.delete_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_sweeps_on_tick_and_stops_on_cancel() {
        let store = Arc::new(InMemoryStore::new().with_lease(stale_lease("a")));
        let coordinator = Arc::new(StageCoordinator::new(
            store.clone(),
            Arc::new(MockMediaTransport::new()),
        ));
        let cancel_token = CancellationToken::new();

        let task = tokio::spawn(start_lease_cleanup(
            coordinator,
            LeaseCleanupConfig::default(),
            cancel_token.clone(),
        ));

        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.lease_count(), 0);

        cancel_token.cancel();
        task.await.unwrap();
    }
}
