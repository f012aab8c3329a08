//! Roster-change notification channel.
//!
//! The session registry publishes a [`RosterChangedEvent`] synchronously,
//! right after each roster mutation, through [`NotificationChannel`].
//! Delivery is fire-and-forget.
//!
//! In-process subscribers read from [`BroadcastNotifier`]. The Redis
//! forwarder subscribes to the same broadcast and re-publishes each event on
//! `live:event:{event_id}:roster` for the chat/UI tier, preserving the order
//! in which mutations were applied.

use crate::errors::LcError;
use crate::models::RosterChangedEvent;
use crate::observability::metrics;
use common::types::EventId;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the in-process broadcast. Receivers that fall further behind
/// skip events (`RecvError::Lagged`).
pub const BROADCAST_CAPACITY: usize = 4096;

/// Fanout for roster-change events.
pub trait NotificationChannel: Send + Sync {
    /// Publish an event for `event_id`. Must not block.
    fn publish(&self, event_id: &EventId, event: RosterChangedEvent);
}

/// Redis channel carrying roster events for one scheduled event.
pub fn channel_for(event_id: &EventId) -> String {
    format!("live:event:{event_id}:roster")
}

/// In-process fanout on `tokio::sync::broadcast`. Cloneable.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Arc<RosterChangedEvent>>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RosterChangedEvent>> {
        self.sender.subscribe()
    }
}

impl NotificationChannel for BroadcastNotifier {
    fn publish(&self, event_id: &EventId, event: RosterChangedEvent) {
        debug!(
            target: "lc.services.notifier",
            event_id = %event_id,
            session_id = %event.session_id,
            version = event.version,
            ended = event.ended,
            "Publishing roster change"
        );
        // Err only means nobody is subscribed.
        let _ = self.sender.send(Arc::new(event));
    }
}

/// Open a Redis connection and forward every broadcast event to Redis
/// pub/sub until `cancel_token` fires.
///
/// # Errors
///
/// Returns `LcError::Notification` if Redis cannot be reached at startup.
pub async fn spawn_redis_forwarder(
    redis_url: &str,
    receiver: broadcast::Receiver<Arc<RosterChangedEvent>>,
    cancel_token: CancellationToken,
) -> Result<JoinHandle<()>, LcError> {
    let client = Client::open(redis_url).map_err(|e| {
        // Do not log redis_url, it may carry a password.
        error!(target: "lc.services.notifier", error = %e, "Failed to open Redis client");
        LcError::Notification(format!("failed to open Redis client: {e}"))
    })?;

    let connection = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| {
            error!(target: "lc.services.notifier", error = %e, "Failed to connect to Redis");
            LcError::Notification(format!("failed to connect to Redis: {e}"))
        })?;

    Ok(tokio::spawn(run_redis_forwarder(
        connection,
        receiver,
        cancel_token,
    )))
}

async fn run_redis_forwarder(
    mut connection: MultiplexedConnection,
    mut receiver: broadcast::Receiver<Arc<RosterChangedEvent>>,
    cancel_token: CancellationToken,
) {
    info!(target: "lc.services.notifier", "Redis roster forwarder started");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "lc.services.notifier", "Redis roster forwarder received shutdown signal");
                break;
            }
            received = receiver.recv() => match received {
                Ok(event) => publish_to_redis(&mut connection, &event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "lc.services.notifier",
                        skipped = skipped,
                        "Redis forwarder lagged, roster events dropped"
                    );
                    metrics::record_notifications_dropped(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!(target: "lc.services.notifier", "Roster broadcast closed");
                    break;
                }
            }
        }
    }

    info!(target: "lc.services.notifier", "Redis roster forwarder stopped");
}

async fn publish_to_redis(connection: &mut MultiplexedConnection, event: &RosterChangedEvent) {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            error!(target: "lc.services.notifier", error = %e, "Failed to serialize roster event");
            return;
        }
    };

    let channel = channel_for(&event.event_id);
    let published: Result<i64, redis::RedisError> =
        connection.publish(channel.as_str(), payload).await;
    match published {
        Ok(receivers) => {
            debug!(
                target: "lc.services.notifier",
                channel = %channel,
                receivers = receivers,
                version = event.version,
                "Roster event published to Redis"
            );
        }
        Err(e) => {
            warn!(
                target: "lc.services.notifier",
                error = %e,
                channel = %channel,
                "Failed to publish roster event to Redis"
            );
            metrics::record_notifications_dropped(1);
        }
    }
}

/// Notification channel that records events for assertions.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingNotifier {
        events: Mutex<Vec<(EventId, RosterChangedEvent)>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// All published events, in publish order.
        pub fn events(&self) -> Vec<(EventId, RosterChangedEvent)> {
            self.events.lock().map(|e| e.clone()).unwrap_or_default()
        }

        /// Events published for one session.
        pub fn events_for_session(&self, session_id: &str) -> Vec<RosterChangedEvent> {
            self.events()
                .into_iter()
                .filter(|(_, event)| event.session_id.as_str() == session_id)
                .map(|(_, event)| event)
                .collect()
        }

        pub fn count(&self) -> usize {
            self.events.lock().map(|e| e.len()).unwrap_or_default()
        }
    }

    impl NotificationChannel for RecordingNotifier {
        fn publish(&self, event_id: &EventId, event: RosterChangedEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push((event_id.clone(), event));
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::{SessionId, StageRef, UserId};

    fn event(version: u64) -> RosterChangedEvent {
        RosterChangedEvent {
            event_id: EventId::new("e1"),
            session_id: SessionId::new("e1:h1:1"),
            host_user_id: UserId::new("h1"),
            stage_ref: StageRef::new("stage-1"),
            version,
            roster: vec![],
            ended: false,
        }
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_for(&EventId::new("evt-9")), "live:event:evt-9:roster");
    }

    #[tokio::test]
    async fn test_broadcast_preserves_publish_order() {
        let notifier = BroadcastNotifier::default();
        let mut rx = notifier.subscribe();

        for version in 1..=3 {
            notifier.publish(&EventId::new("e1"), event(version));
        }

        for expected in 1..=3 {
            assert_eq!(rx.recv().await.unwrap().version, expected);
        }
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_fail() {
        let notifier = BroadcastNotifier::new(4);
        notifier.publish(&EventId::new("e1"), event(1));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let notifier = BroadcastNotifier::new(2);
        let mut rx = notifier.subscribe();

        for version in 1..=5 {
            notifier.publish(&EventId::new("e1"), event(version));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().version, 4);
    }

    #[test]
    fn test_roster_event_serialization() {
        let json = serde_json::to_value(event(2)).unwrap();
        assert_eq!(json["event_id"], "e1");
        assert_eq!(json["version"], 2);
        assert_eq!(json["ended"], false);
    }

    #[test]
    fn test_recording_notifier() {
        let notifier = mock::RecordingNotifier::new();
        notifier.publish(&EventId::new("e1"), event(1));
        notifier.publish(&EventId::new("e1"), event(2));

        assert_eq!(notifier.count(), 2);
        assert_eq!(notifier.events_for_session("e1:h1:1").len(), 2);
        assert!(notifier.events_for_session("other").is_empty());
    }
}
