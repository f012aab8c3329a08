//! Observability module for the Live Controller.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;
