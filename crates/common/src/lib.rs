//! Common types shared across Live Stage components.

#![warn(clippy::pedantic)]

/// Module for strongly-typed identifiers
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
