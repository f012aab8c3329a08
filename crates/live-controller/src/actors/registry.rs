//! `SessionRegistry` - single actor owning every live session.
//!
//! The registry is the only owner of the session map. All operations arrive
//! as messages and run one at a time inside the actor loop, so heartbeats,
//! roster edits, stops and sweeps for the same session are serialized
//! without locks. Roster-change events are published from inside the handler
//! that applied the mutation, which keeps them in mutation order.
//!
//! # Liveness
//!
//! - Owner heartbeats refresh the session. A session silent for longer than
//!   the TTL is retired on the next sweep tick and is never visible as live
//!   in the meantime.
//! - A second, shorter sweep evicts non-host roster entries that stopped
//!   sending their own heartbeats. Emptying the roster retires the session.
//! - A closed control connection removes the participant from every session
//!   immediately; if they own a session, it is retired.
//!
//! Retired session ids are never reinserted.

use super::messages::{RegistryMessage, StartSession};
use crate::config::Config;
use crate::errors::LcError;
use crate::models::{
    validate_display_name, LiveBroadcast, LiveSession, ParticipantRole, RegistryStatus,
    RetireReason, RosterChangedEvent, RosterEntry, RosterUpdate, SessionMetadata,
};
use crate::observability::metrics;
use crate::services::notifier::NotificationChannel;
use chrono::{DateTime, Utc};
use common::types::{EventId, SessionId, StageRef, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Mailbox size for the registry.
const REGISTRY_CHANNEL_BUFFER: usize = 1024;

/// Timing and batching knobs for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub session_ttl: Duration,
    pub session_sweep_interval: Duration,
    pub participant_grace: Duration,
    pub participant_sweep_interval: Duration,

    /// Most sessions (or roster entries) a single sweep tick may remove.
    pub sweep_batch_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(60),
            session_sweep_interval: Duration::from_secs(10),
            participant_grace: Duration::from_secs(30),
            participant_sweep_interval: Duration::from_secs(5),
            sweep_batch_size: 500,
        }
    }
}

impl RegistryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_ttl: config.session_ttl(),
            session_sweep_interval: Duration::from_secs(config.session_sweep_interval_seconds),
            participant_grace: config.participant_grace(),
            participant_sweep_interval: Duration::from_secs(
                config.participant_sweep_interval_seconds,
            ),
            sweep_batch_size: usize::try_from(config.sweep_batch_size).unwrap_or(usize::MAX),
        }
    }
}

/// Handle to the `SessionRegistry` actor. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl SessionRegistryHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, LcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| LcError::Internal(format!("registry channel send failed: {e}")))?;

        rx.await
            .map_err(|e| LcError::Internal(format!("registry response receive failed: {e}")))
    }

    /// Register a new live session whose roster holds only the host.
    ///
    /// # Errors
    ///
    /// `LcError::Validation` for malformed ids, display name or metadata.
    pub async fn start_session(&self, request: StartSession) -> Result<LiveSession, LcError> {
        self.request(|respond_to| RegistryMessage::StartSession {
            request,
            respond_to,
        })
        .await?
    }

    /// Owner heartbeat.
    ///
    /// # Errors
    ///
    /// `LcError::NotFound` if the session is not live,
    /// `LcError::Unauthorized` if `caller_id` is not the owner.
    pub async fn heartbeat(&self, session_id: SessionId, caller_id: UserId) -> Result<(), LcError> {
        self.request(|respond_to| RegistryMessage::Heartbeat {
            session_id,
            caller_id,
            respond_to,
        })
        .await?
    }

    /// Heartbeat for a single roster entry.
    ///
    /// # Errors
    ///
    /// `LcError::NotFound` if the session or the entry is absent.
    pub async fn participant_heartbeat(
        &self,
        session_id: SessionId,
        participant_id: UserId,
    ) -> Result<(), LcError> {
        self.request(|respond_to| RegistryMessage::ParticipantHeartbeat {
            session_id,
            participant_id,
            respond_to,
        })
        .await?
    }

    /// Add a participant. Adding someone already on the roster is a no-op.
    pub async fn add_participant(
        &self,
        session_id: SessionId,
        participant_id: UserId,
        display_name: String,
        role: ParticipantRole,
    ) -> Result<RosterUpdate, LcError> {
        self.request(|respond_to| RegistryMessage::AddParticipant {
            session_id,
            participant_id,
            display_name,
            role,
            respond_to,
        })
        .await?
    }

    /// Remove a participant. Removing someone absent is a no-op.
    pub async fn remove_participant(
        &self,
        session_id: SessionId,
        participant_id: UserId,
    ) -> Result<RosterUpdate, LcError> {
        self.request(|respond_to| RegistryMessage::RemoveParticipant {
            session_id,
            participant_id,
            respond_to,
        })
        .await?
    }

    /// Owner-only stop. Returns the retired session.
    pub async fn stop_session(
        &self,
        session_id: SessionId,
        caller_id: UserId,
    ) -> Result<LiveSession, LcError> {
        self.request(|respond_to| RegistryMessage::StopSession {
            session_id,
            caller_id,
            respond_to,
        })
        .await?
    }

    /// Report that a participant's control connection closed.
    pub async fn participant_disconnected(
        &self,
        participant_id: UserId,
    ) -> Result<Vec<SessionId>, LcError> {
        self.request(|respond_to| RegistryMessage::ParticipantDisconnected {
            participant_id,
            respond_to,
        })
        .await
    }

    /// Snapshot of a live session, `None` if absent or past its TTL.
    pub async fn get_session(&self, session_id: SessionId) -> Result<Option<LiveSession>, LcError> {
        self.request(|respond_to| RegistryMessage::GetSession {
            session_id,
            respond_to,
        })
        .await
    }

    /// Live broadcasts for an event, one per stage.
    pub async fn list_live_by_event(
        &self,
        event_id: EventId,
    ) -> Result<Vec<LiveBroadcast>, LcError> {
        self.request(|respond_to| RegistryMessage::ListLiveByEvent {
            event_id,
            respond_to,
        })
        .await
    }

    pub async fn status(&self) -> Result<RegistryStatus, LcError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// One roster entry plus its own liveness clock.
#[derive(Debug)]
struct RosterMember {
    entry: RosterEntry,
    last_seen: Instant,
}

/// Registry-internal session state.
#[derive(Debug)]
struct SessionEntry {
    session_id: SessionId,
    event_id: EventId,
    host_user_id: UserId,
    host_display_name: String,
    metadata: SessionMetadata,
    stage_ref: StageRef,
    started_at: DateTime<Utc>,
    last_seen: Instant,
    last_seen_at: DateTime<Utc>,
    version: u64,
    roster: Vec<RosterMember>,
}

impl SessionEntry {
    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.last_seen) > ttl
    }

    fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.host_user_id == user_id
    }

    fn member_mut(&mut self, participant_id: &UserId) -> Option<&mut RosterMember> {
        self.roster
            .iter_mut()
            .find(|m| &m.entry.participant_id == participant_id)
    }

    fn contains(&self, participant_id: &UserId) -> bool {
        self.roster
            .iter()
            .any(|m| &m.entry.participant_id == participant_id)
    }

    /// The owner may stop the session even after leaving the roster.
    fn may_stop(&self, caller_id: &UserId) -> bool {
        let role = self
            .roster
            .iter()
            .find(|m| &m.entry.participant_id == caller_id)
            .map_or(ParticipantRole::Host, |m| m.entry.role);
        self.is_owned_by(caller_id) && role.can_stop_session()
    }

    fn roster_entries(&self) -> Vec<RosterEntry> {
        self.roster.iter().map(|m| m.entry.clone()).collect()
    }

    fn snapshot(&self) -> LiveSession {
        LiveSession {
            session_id: self.session_id.clone(),
            event_id: self.event_id.clone(),
            host_user_id: self.host_user_id.clone(),
            host_display_name: self.host_display_name.clone(),
            metadata: self.metadata.clone(),
            stage_ref: self.stage_ref.clone(),
            started_at: self.started_at,
            last_seen_at: self.last_seen_at,
            version: self.version,
            roster: self.roster_entries(),
        }
    }

    fn roster_event(&self, ended: bool) -> RosterChangedEvent {
        RosterChangedEvent {
            event_id: self.event_id.clone(),
            session_id: self.session_id.clone(),
            host_user_id: self.host_user_id.clone(),
            stage_ref: self.stage_ref.clone(),
            version: self.version,
            roster: if ended {
                Vec::new()
            } else {
                self.roster_entries()
            },
            ended,
        }
    }

    fn roster_update(&self, changed: bool, retired: bool) -> RosterUpdate {
        RosterUpdate {
            session_id: self.session_id.clone(),
            version: self.version,
            roster: self.roster_entries(),
            changed,
            retired,
        }
    }
}

/// The `SessionRegistry` actor.
pub struct SessionRegistry {
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    config: RegistryConfig,
    notifier: Arc<dyn NotificationChannel>,
    sessions: HashMap<SessionId, SessionEntry>,

    /// Last epoch used in a session id; ids of one process never repeat even
    /// when two sessions start within the same millisecond.
    last_epoch_ms: i64,
}

impl SessionRegistry {
    /// Spawn the registry actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        config: RegistryConfig,
        notifier: Arc<dyn NotificationChannel>,
        cancel_token: CancellationToken,
    ) -> (SessionRegistryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            config,
            notifier,
            sessions: HashMap::new(),
            last_epoch_ms: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        (
            SessionRegistryHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "lc.actor.registry")]
    async fn run(mut self) {
        info!(
            target: "lc.actor.registry",
            session_ttl_secs = self.config.session_ttl.as_secs(),
            participant_grace_secs = self.config.participant_grace.as_secs(),
            "SessionRegistry started"
        );

        let mut session_sweep = tokio::time::interval(self.config.session_sweep_interval);
        session_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut participant_sweep = tokio::time::interval(self.config.participant_sweep_interval);
        participant_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Sweeps that are due run before queued messages.
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(target: "lc.actor.registry", "SessionRegistry received cancellation signal");
                    break;
                }

                _ = session_sweep.tick() => {
                    self.sweep_stale_sessions();
                }

                _ = participant_sweep.tick() => {
                    self.sweep_idle_participants();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(target: "lc.actor.registry", "SessionRegistry channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "lc.actor.registry",
            live_sessions = self.sessions.len(),
            "SessionRegistry stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::StartSession {
                request,
                respond_to,
            } => {
                let _ = respond_to.send(self.start_session(request));
            }
            RegistryMessage::Heartbeat {
                session_id,
                caller_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.heartbeat(&session_id, &caller_id));
            }
            RegistryMessage::ParticipantHeartbeat {
                session_id,
                participant_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.participant_heartbeat(&session_id, &participant_id));
            }
            RegistryMessage::AddParticipant {
                session_id,
                participant_id,
                display_name,
                role,
                respond_to,
            } => {
                let result = self.add_participant(&session_id, participant_id, display_name, role);
                let _ = respond_to.send(result);
            }
            RegistryMessage::RemoveParticipant {
                session_id,
                participant_id,
                respond_to,
            } => {
                let result = self.remove_participant(&session_id, &participant_id);
                let _ = respond_to.send(result);
            }
            RegistryMessage::StopSession {
                session_id,
                caller_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.stop_session(&session_id, &caller_id));
            }
            RegistryMessage::ParticipantDisconnected {
                participant_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.participant_disconnected(&participant_id));
            }
            RegistryMessage::GetSession {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.get_session(&session_id));
            }
            RegistryMessage::ListLiveByEvent {
                event_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_live_by_event(&event_id));
            }
            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
        }
    }

    fn start_session(&mut self, request: StartSession) -> Result<LiveSession, LcError> {
        if request.event_id.is_empty() {
            return Err(LcError::Validation("event_id must not be empty".to_string()));
        }
        if request.host_user_id.is_empty() {
            return Err(LcError::Validation(
                "host_user_id must not be empty".to_string(),
            ));
        }
        if request.stage_ref.is_empty() {
            return Err(LcError::Validation("stage_ref must not be empty".to_string()));
        }
        validate_display_name(&request.host_display_name)?;
        request.metadata.validate()?;

        let started_at = Utc::now();
        let epoch_ms = started_at
            .timestamp_millis()
            .max(self.last_epoch_ms.saturating_add(1));
        self.last_epoch_ms = epoch_ms;

        let session_id = SessionId::new(format!(
            "{}:{}:{}",
            request.event_id, request.host_user_id, epoch_ms
        ));
        let host_display_name = request.host_display_name.trim().to_string();
        let now = Instant::now();

        let entry = SessionEntry {
            session_id: session_id.clone(),
            event_id: request.event_id,
            host_user_id: request.host_user_id.clone(),
            host_display_name: host_display_name.clone(),
            metadata: request.metadata,
            stage_ref: request.stage_ref,
            started_at,
            last_seen: now,
            last_seen_at: started_at,
            version: 1,
            roster: vec![RosterMember {
                entry: RosterEntry {
                    participant_id: request.host_user_id,
                    display_name: host_display_name,
                    role: ParticipantRole::Host,
                    joined_at: started_at,
                },
                last_seen: now,
            }],
        };

        let snapshot = entry.snapshot();
        self.notifier
            .publish(&entry.event_id, entry.roster_event(false));
        self.sessions.insert(session_id, entry);

        metrics::record_session_started();
        self.record_size();

        info!(
            target: "lc.actor.registry",
            session_id = %snapshot.session_id,
            event_id = %snapshot.event_id,
            host_user_id = %snapshot.host_user_id,
            stage_ref = %snapshot.stage_ref,
            "Session started"
        );

        Ok(snapshot)
    }

    /// Look up a session for mutation. A session past its TTL is retired on
    /// the spot and reported as absent.
    fn live_session_mut(&mut self, session_id: &SessionId) -> Option<&mut SessionEntry> {
        let now = Instant::now();
        let stale = self
            .sessions
            .get(session_id)
            .map(|s| s.is_stale(now, self.config.session_ttl))?;

        if stale {
            self.retire(session_id, RetireReason::Expired);
            return None;
        }
        self.sessions.get_mut(session_id)
    }

    fn heartbeat(&mut self, session_id: &SessionId, caller_id: &UserId) -> Result<(), LcError> {
        let session = self
            .live_session_mut(session_id)
            .ok_or_else(|| LcError::NotFound("session".to_string()))?;

        if !session.is_owned_by(caller_id) {
            return Err(LcError::Unauthorized(
                "only the session owner may send heartbeats".to_string(),
            ));
        }

        let now = Instant::now();
        session.last_seen = now;
        session.last_seen_at = Utc::now();
        if let Some(member) = session.member_mut(caller_id) {
            member.last_seen = now;
        }

        debug!(target: "lc.actor.registry", session_id = %session_id, "Heartbeat");
        Ok(())
    }

    fn participant_heartbeat(
        &mut self,
        session_id: &SessionId,
        participant_id: &UserId,
    ) -> Result<(), LcError> {
        let session = self
            .live_session_mut(session_id)
            .ok_or_else(|| LcError::NotFound("session".to_string()))?;

        let member = session
            .member_mut(participant_id)
            .ok_or_else(|| LcError::NotFound("participant".to_string()))?;
        member.last_seen = Instant::now();
        Ok(())
    }

    fn add_participant(
        &mut self,
        session_id: &SessionId,
        participant_id: UserId,
        display_name: String,
        role: ParticipantRole,
    ) -> Result<RosterUpdate, LcError> {
        if participant_id.is_empty() {
            return Err(LcError::Validation(
                "participant_id must not be empty".to_string(),
            ));
        }
        validate_display_name(&display_name)?;

        let session = self
            .live_session_mut(session_id)
            .ok_or_else(|| LcError::NotFound("session".to_string()))?;

        if role == ParticipantRole::Host && !session.is_owned_by(&participant_id) {
            return Err(LcError::Validation(
                "only the session owner can hold the host role".to_string(),
            ));
        }

        if session.contains(&participant_id) {
            debug!(
                target: "lc.actor.registry",
                session_id = %session_id,
                participant_id = %participant_id,
                "Participant already on roster"
            );
            return Ok(session.roster_update(false, false));
        }

        session.roster.push(RosterMember {
            entry: RosterEntry {
                participant_id: participant_id.clone(),
                display_name: display_name.trim().to_string(),
                role,
                joined_at: Utc::now(),
            },
            last_seen: Instant::now(),
        });
        session.version += 1;

        let event_id = session.event_id.clone();
        let event = session.roster_event(false);
        let update = session.roster_update(true, false);
        self.notifier.publish(&event_id, event);

        metrics::record_roster_mutation("add");
        self.record_size();

        info!(
            target: "lc.actor.registry",
            session_id = %session_id,
            participant_id = %participant_id,
            role = %role,
            version = update.version,
            "Participant added"
        );

        Ok(update)
    }

    fn remove_participant(
        &mut self,
        session_id: &SessionId,
        participant_id: &UserId,
    ) -> Result<RosterUpdate, LcError> {
        if self.live_session_mut(session_id).is_none() {
            return Err(LcError::NotFound("session".to_string()));
        }
        self.remove_member(session_id, participant_id, "remove", RetireReason::EmptyRoster)
    }

    /// Remove a roster entry, publish, and retire the session if the roster
    /// became empty.
    fn remove_member(
        &mut self,
        session_id: &SessionId,
        participant_id: &UserId,
        kind: &'static str,
        empty_reason: RetireReason,
    ) -> Result<RosterUpdate, LcError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| LcError::NotFound("session".to_string()))?;

        let before = session.roster.len();
        session
            .roster
            .retain(|m| &m.entry.participant_id != participant_id);
        if session.roster.len() == before {
            return Ok(session.roster_update(false, false));
        }
        session.version += 1;

        let emptied = session.roster.is_empty();
        let event_id = session.event_id.clone();
        let event = session.roster_event(false);
        let update = session.roster_update(true, emptied);
        self.notifier.publish(&event_id, event);
        metrics::record_roster_mutation(kind);

        info!(
            target: "lc.actor.registry",
            session_id = %session_id,
            participant_id = %participant_id,
            kind = kind,
            version = update.version,
            "Participant removed"
        );

        if emptied {
            self.retire(session_id, empty_reason);
        } else {
            self.record_size();
        }

        Ok(update)
    }

    fn stop_session(
        &mut self,
        session_id: &SessionId,
        caller_id: &UserId,
    ) -> Result<LiveSession, LcError> {
        let session = self
            .live_session_mut(session_id)
            .ok_or_else(|| LcError::NotFound("session".to_string()))?;

        if !session.may_stop(caller_id) {
            return Err(LcError::Unauthorized(
                "only the session owner may stop it".to_string(),
            ));
        }

        self.retire(session_id, RetireReason::Stopped)
            .ok_or_else(|| LcError::NotFound("session".to_string()))
    }

    fn participant_disconnected(&mut self, participant_id: &UserId) -> Vec<SessionId> {
        let mut affected: Vec<(SessionId, bool)> = self
            .sessions
            .values()
            .filter(|s| s.is_owned_by(participant_id) || s.contains(participant_id))
            .map(|s| (s.session_id.clone(), s.is_owned_by(participant_id)))
            .collect();
        affected.sort();

        for (session_id, owned) in &affected {
            if *owned {
                self.retire(session_id, RetireReason::Disconnected);
            } else {
                let _ = self.remove_member(
                    session_id,
                    participant_id,
                    "disconnect",
                    RetireReason::Disconnected,
                );
            }
        }

        if !affected.is_empty() {
            info!(
                target: "lc.actor.registry",
                participant_id = %participant_id,
                sessions = affected.len(),
                "Removed disconnected participant"
            );
        }

        affected.into_iter().map(|(id, _)| id).collect()
    }

    /// Retire a session and publish its final event.
    fn retire(&mut self, session_id: &SessionId, reason: RetireReason) -> Option<LiveSession> {
        let entry = self.sessions.remove(session_id)?;
        let snapshot = entry.snapshot();

        self.notifier
            .publish(&entry.event_id, entry.roster_event(true));
        metrics::record_session_retired(reason.as_str());
        self.record_size();

        info!(
            target: "lc.actor.registry",
            session_id = %session_id,
            event_id = %entry.event_id,
            reason = reason.as_str(),
            version = entry.version,
            "Session retired"
        );

        Some(snapshot)
    }

    fn get_session(&self, session_id: &SessionId) -> Option<LiveSession> {
        let now = Instant::now();
        self.sessions
            .get(session_id)
            .filter(|s| !s.is_stale(now, self.config.session_ttl))
            .map(SessionEntry::snapshot)
    }

    /// Non-stale sessions of one event, merged per stage. Sessions sharing a
    /// stage are one broadcast to listeners.
    fn list_live_by_event(&self, event_id: &EventId) -> Vec<LiveBroadcast> {
        let now = Instant::now();
        let mut live: Vec<&SessionEntry> = self
            .sessions
            .values()
            .filter(|s| &s.event_id == event_id && !s.is_stale(now, self.config.session_ttl))
            .collect();
        live.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });

        let mut broadcasts: Vec<LiveBroadcast> = Vec::new();
        let mut by_stage: HashMap<&StageRef, usize> = HashMap::new();

        for session in live {
            let existing = by_stage
                .get(&session.stage_ref)
                .copied()
                .and_then(|idx| broadcasts.get_mut(idx));

            match existing {
                Some(broadcast) => {
                    broadcast.session_ids.push(session.session_id.clone());
                    broadcast.version = broadcast.version.max(session.version);
                    for member in &session.roster {
                        let seen = broadcast
                            .roster
                            .iter()
                            .any(|e| e.participant_id == member.entry.participant_id);
                        if !seen {
                            broadcast.roster.push(member.entry.clone());
                        }
                    }
                }
                None => {
                    by_stage.insert(&session.stage_ref, broadcasts.len());
                    broadcasts.push(LiveBroadcast {
                        stage_ref: session.stage_ref.clone(),
                        event_id: session.event_id.clone(),
                        session_ids: vec![session.session_id.clone()],
                        host_user_id: session.host_user_id.clone(),
                        host_display_name: session.host_display_name.clone(),
                        metadata: session.metadata.clone(),
                        started_at: session.started_at,
                        version: session.version,
                        roster: session.roster_entries(),
                    });
                }
            }
        }

        broadcasts
    }

    fn status(&self) -> RegistryStatus {
        RegistryStatus {
            live_sessions: self.sessions.len(),
            roster_entries: self.sessions.values().map(|s| s.roster.len()).sum(),
        }
    }

    fn record_size(&self) {
        let status = self.status();
        metrics::set_registry_size(status.live_sessions, status.roster_entries);
    }

    /// Retire sessions whose owner stopped heartbeating.
    fn sweep_stale_sessions(&mut self) {
        let now = Instant::now();
        let ttl = self.config.session_ttl;

        let mut stale: Vec<(Instant, SessionId)> = self
            .sessions
            .values()
            .filter(|s| s.is_stale(now, ttl))
            .map(|s| (s.last_seen, s.session_id.clone()))
            .collect();
        stale.sort();
        stale.truncate(self.config.sweep_batch_size);

        for (_, session_id) in &stale {
            self.retire(session_id, RetireReason::Expired);
        }

        if !stale.is_empty() {
            info!(
                target: "lc.actor.registry",
                count = stale.len(),
                "Swept stale sessions"
            );
            metrics::record_sweep_deleted("sessions", stale.len() as u64);
        }
    }

    /// Evict non-host roster entries that stopped heartbeating.
    fn sweep_idle_participants(&mut self) {
        let now = Instant::now();
        let ttl = self.config.session_ttl;
        let grace = self.config.participant_grace;

        let mut idle: Vec<(SessionId, UserId)> = Vec::new();
        for session in self.sessions.values() {
            if session.is_stale(now, ttl) {
                // Left to the session sweep.
                continue;
            }
            for member in &session.roster {
                if !member.entry.role.exempt_from_roster_sweep()
                    && now.duration_since(member.last_seen) > grace
                {
                    idle.push((
                        session.session_id.clone(),
                        member.entry.participant_id.clone(),
                    ));
                }
            }
        }
        idle.sort();
        idle.truncate(self.config.sweep_batch_size);

        for (session_id, participant_id) in &idle {
            let _ = self.remove_member(
                session_id,
                participant_id,
                "evict",
                RetireReason::EmptyRoster,
            );
        }

        if !idle.is_empty() {
            info!(
                target: "lc.actor.registry",
                count = idle.len(),
                "Evicted idle roster entries"
            );
            metrics::record_sweep_deleted("participants", idle.len() as u64);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::notifier::mock::RecordingNotifier;

    fn spawn_registry() -> (SessionRegistryHandle, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let (handle, _task) = SessionRegistry::spawn(
            RegistryConfig::default(),
            notifier.clone(),
            CancellationToken::new(),
        );
        (handle, notifier)
    }

    fn start(event: &str, host: &str, stage: &str) -> StartSession {
        StartSession {
            event_id: EventId::new(event),
            host_user_id: UserId::new(host),
            host_display_name: format!("Host {host}"),
            metadata: SessionMetadata::default(),
            stage_ref: StageRef::new(stage),
        }
    }

    fn ids(roster: &[RosterEntry]) -> Vec<&str> {
        roster.iter().map(|e| e.participant_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_start_session_roster_holds_only_host() {
        let (registry, notifier) = spawn_registry();

        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();

        assert!(session.session_id.as_str().starts_with("e1:h1:"));
        assert_eq!(session.version, 1);
        assert_eq!(ids(&session.roster), vec!["h1"]);
        assert_eq!(session.roster[0].role, ParticipantRole::Host);
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_session_ids_unique_for_same_host() {
        let (registry, _) = spawn_registry();

        let a = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        let b = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();

        assert_ne!(a.session_id, b.session_id);
    }

    #[tokio::test]
    async fn test_start_session_rejects_bad_metadata() {
        let (registry, notifier) = spawn_registry();
        let mut request = start("e1", "h1", "stage-1");
        request.metadata.mode = Some("x".repeat(200));

        let result = registry.start_session(request).await;

        assert!(matches!(result, Err(LcError::Validation(_))));
        assert_eq!(notifier.count(), 0);
        assert_eq!(registry.status().await.unwrap().live_sessions, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_owner_only() {
        let (registry, _) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();

        registry
            .heartbeat(session.session_id.clone(), UserId::new("h1"))
            .await
            .unwrap();

        let result = registry
            .heartbeat(session.session_id.clone(), UserId::new("intruder"))
            .await;
        assert!(matches!(result, Err(LcError::Unauthorized(_))));

        let missing = registry
            .heartbeat(SessionId::new("nope"), UserId::new("h1"))
            .await;
        assert!(matches!(missing, Err(LcError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_add_participant_is_idempotent() {
        let (registry, notifier) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        let sid = session.session_id.clone();

        let first = registry
            .add_participant(sid.clone(), UserId::new("g1"), "Guest".into(), ParticipantRole::Cohost)
            .await
            .unwrap();
        let again = registry
            .add_participant(sid.clone(), UserId::new("g1"), "Guest".into(), ParticipantRole::Cohost)
            .await
            .unwrap();

        assert!(first.changed);
        assert_eq!(first.version, 2);
        assert!(!again.changed);
        assert_eq!(again.version, 2);
        assert_eq!(ids(&again.roster), vec!["h1", "g1"]);
        // start + one effective add
        assert_eq!(notifier.count(), 2);
    }

    #[tokio::test]
    async fn test_only_owner_holds_host_role() {
        let (registry, _) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();

        let result = registry
            .add_participant(session.session_id, UserId::new("g1"), "G".into(), ParticipantRole::Host)
            .await;
        assert!(matches!(result, Err(LcError::Validation(_))));
    }

    #[tokio::test]
    async fn test_version_bumps_once_per_effective_mutation() {
        let (registry, _) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        let sid = session.session_id.clone();
        let mut expected = 1;

        for (op, who, effective) in [
            ("add", "a", true),
            ("add", "b", true),
            ("add", "a", false),
            ("remove", "zz", false),
            ("remove", "a", true),
            ("add", "a", true),
            ("remove", "b", true),
        ] {
            let update = if op == "add" {
                registry
                    .add_participant(sid.clone(), UserId::new(who), who.into(), ParticipantRole::Guest)
                    .await
                    .unwrap()
            } else {
                registry
                    .remove_participant(sid.clone(), UserId::new(who))
                    .await
                    .unwrap()
            };
            if effective {
                expected += 1;
            }
            assert_eq!(update.changed, effective, "{op} {who}");
            assert_eq!(update.version, expected, "{op} {who}");
        }
    }

    #[tokio::test]
    async fn test_removing_last_participant_retires_session() {
        let (registry, notifier) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        let sid = session.session_id.clone();

        let update = registry
            .remove_participant(sid.clone(), UserId::new("h1"))
            .await
            .unwrap();

        assert!(update.retired);
        assert!(update.roster.is_empty());
        assert!(registry.get_session(sid.clone()).await.unwrap().is_none());

        let events = notifier.events_for_session(sid.as_str());
        let last = events.last().unwrap();
        assert!(last.ended);
        assert_eq!(last.version, 2);
    }

    #[tokio::test]
    async fn test_stop_session_owner_only_and_final() {
        let (registry, notifier) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        let sid = session.session_id.clone();

        let denied = registry.stop_session(sid.clone(), UserId::new("g1")).await;
        assert!(matches!(denied, Err(LcError::Unauthorized(_))));

        let stopped = registry.stop_session(sid.clone(), UserId::new("h1")).await.unwrap();
        assert_eq!(stopped.session_id, sid);

        let after = registry.heartbeat(sid.clone(), UserId::new("h1")).await;
        assert!(matches!(after, Err(LcError::NotFound(_))));

        let last = notifier.events_for_session(sid.as_str()).pop().unwrap();
        assert!(last.ended);
        assert_eq!(last.version, 1, "retirement does not bump version");
    }

    #[tokio::test]
    async fn test_disconnect_removes_participant_everywhere() {
        let (registry, _) = spawn_registry();
        let s1 = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        let s2 = registry.start_session(start("e2", "h2", "stage-2")).await.unwrap();
        for sid in [&s1.session_id, &s2.session_id] {
            registry
                .add_participant(sid.clone(), UserId::new("g1"), "G".into(), ParticipantRole::Cohost)
                .await
                .unwrap();
        }

        let affected = registry
            .participant_disconnected(UserId::new("g1"))
            .await
            .unwrap();
        assert_eq!(affected.len(), 2);

        for sid in [s1.session_id, s2.session_id] {
            let session = registry.get_session(sid).await.unwrap().unwrap();
            assert_eq!(ids(&session.roster), vec![session.host_user_id.as_str()]);
            assert_eq!(session.version, 3);
        }
    }

    #[tokio::test]
    async fn test_owner_disconnect_retires_session() {
        let (registry, _) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        registry
            .add_participant(
                session.session_id.clone(),
                UserId::new("g1"),
                "G".into(),
                ParticipantRole::Cohost,
            )
            .await
            .unwrap();

        registry
            .participant_disconnected(UserId::new("h1"))
            .await
            .unwrap();

        assert!(registry
            .get_session(session.session_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_within_ttl_keep_session_alive() {
        let (registry, _) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        let sid = session.session_id.clone();

        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(45)).await;
            registry.heartbeat(sid.clone(), UserId::new("h1")).await.unwrap();
        }

        assert!(registry.get_session(sid).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_session_evicted_on_next_sweep() {
        let (registry, notifier) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        let sid = session.session_id.clone();

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(registry.status().await.unwrap().live_sessions, 0);
        assert!(notifier
            .events_for_session(sid.as_str())
            .last()
            .is_some_and(|e| e.ended));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_session_is_never_reported_live() {
        // Sweep interval longer than the TTL, so only the read path can hide it.
        let notifier = Arc::new(RecordingNotifier::new());
        let config = RegistryConfig {
            session_sweep_interval: Duration::from_secs(600),
            ..RegistryConfig::default()
        };
        let (registry, _task) =
            SessionRegistry::spawn(config, notifier, CancellationToken::new());
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(registry
            .get_session(session.session_id.clone())
            .await
            .unwrap()
            .is_none());
        assert!(registry
            .list_live_by_event(EventId::new("e1"))
            .await
            .unwrap()
            .is_empty());
        let hb = registry
            .heartbeat(session.session_id, UserId::new("h1"))
            .await;
        assert!(matches!(hb, Err(LcError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_cohost_evicted_without_ending_session() {
        let (registry, _) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        let sid = session.session_id.clone();
        for who in ["g1", "g2"] {
            registry
                .add_participant(sid.clone(), UserId::new(who), who.into(), ParticipantRole::Cohost)
                .await
                .unwrap();
        }

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(10)).await;
            registry.heartbeat(sid.clone(), UserId::new("h1")).await.unwrap();
            registry
                .participant_heartbeat(sid.clone(), UserId::new("g2"))
                .await
                .unwrap();
        }

        let live = registry.get_session(sid).await.unwrap().unwrap();
        assert_eq!(ids(&live.roster), vec!["h1", "g2"]);
        assert_eq!(live.version, 4);
    }

    #[tokio::test]
    async fn test_participant_heartbeat_unknown_entry() {
        let (registry, _) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();

        let result = registry
            .participant_heartbeat(session.session_id, UserId::new("ghost"))
            .await;
        assert!(matches!(result, Err(LcError::NotFound(msg)) if msg == "participant"));
    }

    #[tokio::test]
    async fn test_list_live_merges_sessions_sharing_a_stage() {
        let (registry, _) = spawn_registry();
        let host = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        registry
            .add_participant(
                host.session_id.clone(),
                UserId::new("c1"),
                "C".into(),
                ParticipantRole::Cohost,
            )
            .await
            .unwrap();
        let cohost = registry.start_session(start("e1", "c1", "stage-1")).await.unwrap();
        registry.start_session(start("e1", "h2", "stage-2")).await.unwrap();
        registry.start_session(start("other", "h3", "stage-3")).await.unwrap();

        let live = registry.list_live_by_event(EventId::new("e1")).await.unwrap();

        assert_eq!(live.len(), 2);
        let merged = live.iter().find(|b| b.stage_ref.as_str() == "stage-1").unwrap();
        assert_eq!(merged.session_ids, vec![host.session_id, cohost.session_id]);
        assert_eq!(merged.host_user_id, UserId::new("h1"));
        assert_eq!(ids(&merged.roster), vec!["h1", "c1"]);
        assert_eq!(merged.version, 2);
    }

    #[tokio::test]
    async fn test_events_published_in_mutation_order() {
        let (registry, notifier) = spawn_registry();
        let session = registry.start_session(start("e1", "h1", "stage-1")).await.unwrap();
        let sid = session.session_id.clone();
        for who in ["a", "b", "c"] {
            registry
                .add_participant(sid.clone(), UserId::new(who), who.into(), ParticipantRole::Guest)
                .await
                .unwrap();
        }
        registry.remove_participant(sid.clone(), UserId::new("b")).await.unwrap();

        let versions: Vec<u64> = notifier
            .events_for_session(sid.as_str())
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_cancel_stops_actor() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (registry, task) =
            SessionRegistry::spawn(RegistryConfig::default(), notifier, CancellationToken::new());

        registry.cancel();
        task.await.unwrap();

        assert!(registry.is_cancelled());
        assert!(matches!(
            registry.status().await,
            Err(LcError::Internal(_))
        ));
    }
}
