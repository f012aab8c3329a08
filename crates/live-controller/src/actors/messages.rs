//! Message types for the session registry actor.
//!
//! Every request carries a `respond_to` oneshot sender so callers can await
//! the outcome of exactly their own request.

use crate::errors::LcError;
use crate::models::{
    LiveBroadcast, LiveSession, ParticipantRole, RegistryStatus, RosterUpdate, SessionMetadata,
};
use common::types::{EventId, SessionId, StageRef, UserId};
use tokio::sync::oneshot;

/// Parameters for starting a live session.
#[derive(Debug, Clone)]
pub struct StartSession {
    pub event_id: EventId,
    pub host_user_id: UserId,
    pub host_display_name: String,
    pub metadata: SessionMetadata,
    pub stage_ref: StageRef,
}

/// Messages handled by the `SessionRegistry` actor.
#[derive(Debug)]
pub enum RegistryMessage {
    StartSession {
        request: StartSession,
        respond_to: oneshot::Sender<Result<LiveSession, LcError>>,
    },

    /// Owner heartbeat.
    Heartbeat {
        session_id: SessionId,
        caller_id: UserId,
        respond_to: oneshot::Sender<Result<(), LcError>>,
    },

    /// Roster entry heartbeat.
    ParticipantHeartbeat {
        session_id: SessionId,
        participant_id: UserId,
        respond_to: oneshot::Sender<Result<(), LcError>>,
    },

    AddParticipant {
        session_id: SessionId,
        participant_id: UserId,
        display_name: String,
        role: ParticipantRole,
        respond_to: oneshot::Sender<Result<RosterUpdate, LcError>>,
    },

    RemoveParticipant {
        session_id: SessionId,
        participant_id: UserId,
        respond_to: oneshot::Sender<Result<RosterUpdate, LcError>>,
    },

    /// Owner-only stop. Responds with the retired session.
    StopSession {
        session_id: SessionId,
        caller_id: UserId,
        respond_to: oneshot::Sender<Result<LiveSession, LcError>>,
    },

    /// A participant's control connection closed. Responds with the ids of
    /// the sessions that changed.
    ParticipantDisconnected {
        participant_id: UserId,
        respond_to: oneshot::Sender<Vec<SessionId>>,
    },

    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<LiveSession>>,
    },

    ListLiveByEvent {
        event_id: EventId,
        respond_to: oneshot::Sender<Vec<LiveBroadcast>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}
