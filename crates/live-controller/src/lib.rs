//! Live Controller (LC) Service Library
//!
//! Coordinates live broadcasts for scheduled events:
//!
//! - Stage leasing: exactly one media stage per (event, host), persisted so a
//!   restart reuses it
//! - Live session registry: heartbeat liveness and a versioned roster whose
//!   changes are fanned out to listeners
//! - Co-host invites: single-use codes redeemed for a scoped media credential
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//!                                \-> actors/registry.rs (live sessions)
//! ```
//!
//! Durable state (leases, invites) lives in PostgreSQL. Live sessions live
//! only in the registry actor's memory and are rebuilt by clients
//! re-starting their broadcasts after a restart.
//!
//! # Modules
//!
//! - `actors` - `SessionRegistry` actor and its messages
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - HTTP metrics and caller identity
//! - `models` - Domain and API models
//! - `observability` - Prometheus metrics
//! - `repositories` - Persistent store (PostgreSQL and in-memory)
//! - `routes` - Axum router setup
//! - `services` - Stage coordinator, invite ledger, media transport, notifier
//! - `tasks` - Lease and invite cleanup background tasks

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
