//! Background tasks for the Live Controller.
//!
//! # Tasks
//!
//! - `lease_cleanup` - deletes stage leases nobody touched for a while, then
//!   their remote stages
//! - `invite_cleanup` - purges invites that expired without being consumed
//! - `lease_unbind` - clears a retired session from its stage lease
//!
//! Session liveness sweeps run inside the registry actor itself.

pub mod invite_cleanup;
pub mod lease_cleanup;
pub mod lease_unbind;

pub use invite_cleanup::{start_invite_cleanup, InviteCleanupConfig};
pub use lease_cleanup::{start_lease_cleanup, LeaseCleanupConfig};
pub use lease_unbind::start_lease_unbinder;
