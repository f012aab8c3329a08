//! HTTP request handlers for the Live Controller.

pub mod events;
pub mod health;
pub mod invites;
pub mod metrics;
pub mod sessions;

pub use events::list_live;
pub use health::health_check;
pub use invites::{consume_invite, create_invite, peek_invite, revoke_invite};
pub use metrics::metrics_handler;
pub use sessions::{heartbeat, participant_heartbeat, start_session, stop_session};
