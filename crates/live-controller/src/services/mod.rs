//! Service layer for the Live Controller.
//!
//! # Components
//!
//! - `stage_coordinator` - one media stage per (event, host), cached and persisted
//! - `invite_ledger` - single-use co-host invites
//! - `media_transport` - client for the external Media Transport Service
//! - `notifier` - roster-change fanout (in-process broadcast, Redis pub/sub)

pub mod invite_ledger;
pub mod media_transport;
pub mod notifier;
pub mod stage_coordinator;

pub use invite_ledger::{InviteConfig, InviteLedger};
pub use media_transport::{HttpMediaTransport, MediaTransport};
pub use notifier::{BroadcastNotifier, NotificationChannel};
pub use stage_coordinator::StageCoordinator;
