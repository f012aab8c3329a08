//! Actor model for the Live Controller.
//!
//! # Components
//!
//! - `registry` - `SessionRegistry`, the single owner of every live session
//! - `messages` - request messages and their oneshot responders
//!
//! The registry is the only mutable view of live sessions. Callers talk to it
//! through a cloneable [`SessionRegistryHandle`]; every request is answered
//! over its own oneshot channel.

pub mod messages;
pub mod registry;

pub use messages::StartSession;
pub use registry::{RegistryConfig, SessionRegistry, SessionRegistryHandle};
