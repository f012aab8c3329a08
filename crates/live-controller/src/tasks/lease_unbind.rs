//! Lease unbind background task.
//!
//! Listens for `ended` roster events and clears the retired session from its
//! stage lease. This covers every retirement path (stop, TTL expiry, emptied
//! roster, disconnect), not only the HTTP stop. The unbind is conditional, so
//! an older session ending never clears a newer session's binding.

use crate::models::{RosterChangedEvent, StageLease};
use crate::services::StageCoordinator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Run the unbind loop until `cancel_token` fires or the broadcast closes.
#[instrument(skip_all, name = "lc.task.lease_unbind")]
pub async fn start_lease_unbinder(
    coordinator: Arc<StageCoordinator>,
    mut receiver: broadcast::Receiver<Arc<RosterChangedEvent>>,
    cancel_token: CancellationToken,
) {
    info!(target: "lc.task.lease_unbind", "Starting lease unbind task");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(
                    target: "lc.task.lease_unbind",
                    "Lease unbind task received shutdown signal, exiting"
                );
                break;
            }
            received = receiver.recv() => match received {
                Ok(event) if event.ended => unbind_retired(&coordinator, &event).await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed bindings are overwritten by the host's next start.
                    warn!(
                        target: "lc.task.lease_unbind",
                        skipped = skipped,
                        "Lease unbind task lagged, roster events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!(target: "lc.task.lease_unbind", "Roster broadcast closed");
                    break;
                }
            }
        }
    }

    info!(target: "lc.task.lease_unbind", "Lease unbind task stopped");
}

pub(crate) async fn unbind_retired(coordinator: &StageCoordinator, event: &RosterChangedEvent) {
    let stage_key = StageLease::key_for(&event.event_id, &event.host_user_id);

    if let Err(e) = coordinator
        .unbind_session(&stage_key, &event.session_id)
        .await
    {
        warn!(
            target: "lc.task.lease_unbind",
            session_id = %event.session_id,
            error = %e,
            "Failed to unbind retired session from stage lease"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{RegistryConfig, SessionRegistry, StartSession};
    use crate::models::SessionMetadata;
    use crate::repositories::mock::InMemoryStore;
    use crate::services::media_transport::mock::MockMediaTransport;
    use crate::services::BroadcastNotifier;
    use common::types::{EventId, SessionId, UserId};
    use std::time::Duration;

    fn setup() -> (Arc<InMemoryStore>, Arc<StageCoordinator>) {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(StageCoordinator::new(
            store.clone(),
            Arc::new(MockMediaTransport::new()),
        ));
        (store, coordinator)
    }

    /// Poll until the lease binding matches `expected`.
    async fn wait_for_binding(store: &InMemoryStore, key: &str, expected: Option<SessionId>) {
        for _ in 0..100 {
            if store.lease(key).unwrap().bound_session_id == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("binding never became {expected:?}");
    }

    #[tokio::test]
    async fn test_unbind_retired_ignores_other_sessions() {
        let (store, coordinator) = setup();
        let (event_id, host) = (EventId::new("e1"), UserId::new("h1"));
        let lease = coordinator.lease_stage(&event_id, &host, "Host").await.unwrap();
        let live = SessionId::new("e1:h1:2");
        coordinator.bind_session(&lease.stage_key, &live).await.unwrap();

        let ended = RosterChangedEvent {
            event_id: event_id.clone(),
            session_id: SessionId::new("e1:h1:1"),
            host_user_id: host.clone(),
            stage_ref: lease.stage_ref.clone(),
            version: 1,
            roster: vec![],
            ended: true,
        };
        unbind_retired(&coordinator, &ended).await;
        assert_eq!(store.lease(&lease.stage_key).unwrap().bound_session_id, Some(live.clone()));

        let ended_live = RosterChangedEvent {
            session_id: live,
            ..ended
        };
        unbind_retired(&coordinator, &ended_live).await;
        assert_eq!(store.lease(&lease.stage_key).unwrap().bound_session_id, None);
    }

    #[tokio::test]
    async fn test_disconnect_retirement_clears_binding() {
        let (store, coordinator) = setup();
        let notifier = BroadcastNotifier::default();
        let receiver = notifier.subscribe();
        let token = CancellationToken::new();
        let (registry, _registry_task) = SessionRegistry::spawn(
            RegistryConfig::default(),
            Arc::new(notifier),
            token.child_token(),
        );
        let task = tokio::spawn(start_lease_unbinder(
            coordinator.clone(),
            receiver,
            token.child_token(),
        ));

        let (event_id, host) = (EventId::new("e1"), UserId::new("h1"));
        let lease = coordinator.lease_stage(&event_id, &host, "Host").await.unwrap();
        let session = registry
            .start_session(StartSession {
                event_id,
                host_user_id: host.clone(),
                host_display_name: "Host".to_string(),
                metadata: SessionMetadata::default(),
                stage_ref: lease.stage_ref.clone(),
            })
            .await
            .unwrap();
        coordinator
            .bind_session(&lease.stage_key, &session.session_id)
            .await
            .unwrap();

        // Not an HTTP stop: the owner's connection closed.
        registry.participant_disconnected(host).await.unwrap();

        wait_for_binding(&store, &lease.stage_key, None).await;

        token.cancel();
        task.await.unwrap();
    }
}
