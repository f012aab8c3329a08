//! Metrics definitions for the Live Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `lc_` prefix for Live Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `endpoint`: parameterized route templates, unknown paths become `/other`
//! - `reason`: retire reasons and invite reasons, bounded by enums
//! - `source`: cache, store, created, race_lost
//! - `sweep`: sessions, participants, leases, invites
//!
//! Ids never appear as label values.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle served on
/// `/metrics`.
///
/// # Errors
///
/// Returns an error if the recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("lc_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Stage leasing includes a remote create on cold paths
        .set_buckets_for_metric(
            Matcher::Prefix("lc_stage_lease".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set stage lease buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("lc_invite_consume".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500],
        )
        .map_err(|e| format!("Failed to set invite consume buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `lc_http_requests_total`, `lc_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(path);
    let status = categorize_status_code(status_code);

    histogram!("lc_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("lc_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Replace id segments with route placeholders.
fn normalize_endpoint(path: &str) -> &'static str {
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();

    match segments.as_slice() {
        ["", "v1", "health"] => "/v1/health",
        ["", "metrics"] => "/metrics",
        ["", "v1", "events", _, "sessions"] => "/v1/events/{event_id}/sessions",
        ["", "v1", "events", _, "live"] => "/v1/events/{event_id}/live",
        ["", "v1", "sessions", _] => "/v1/sessions/{session_id}",
        ["", "v1", "sessions", _, "heartbeat"] => "/v1/sessions/{session_id}/heartbeat",
        ["", "v1", "sessions", _, "participants", "heartbeat"] => {
            "/v1/sessions/{session_id}/participants/heartbeat"
        }
        ["", "v1", "sessions", _, "invites"] => "/v1/sessions/{session_id}/invites",
        ["", "v1", "invites", _] => "/v1/invites/{code}",
        ["", "v1", "invites", _, "consume"] => "/v1/invites/{code}/consume",
        _ => "/other",
    }
}

// ============================================================================
// Session Registry Metrics
// ============================================================================

/// Metric: `lc_sessions_started_total`
pub fn record_session_started() {
    counter!("lc_sessions_started_total").increment(1);
}

/// Metric: `lc_sessions_retired_total`
/// Labels: `reason` (stopped, expired, empty_roster, disconnected)
pub fn record_session_retired(reason: &'static str) {
    counter!("lc_sessions_retired_total", "reason" => reason).increment(1);
}

/// Metric: `lc_live_sessions`, `lc_roster_entries`
pub fn set_registry_size(sessions: usize, roster_entries: usize) {
    gauge!("lc_live_sessions").set(sessions as f64);
    gauge!("lc_roster_entries").set(roster_entries as f64);
}

/// Metric: `lc_roster_mutations_total`
/// Labels: `kind` (add, remove, evict, disconnect)
pub fn record_roster_mutation(kind: &'static str) {
    counter!("lc_roster_mutations_total", "kind" => kind).increment(1);
}

/// Metric: `lc_notifications_dropped_total`
pub fn record_notifications_dropped(count: u64) {
    counter!("lc_notifications_dropped_total").increment(count);
}

// ============================================================================
// Stage Coordinator Metrics
// ============================================================================

/// Record how a lease request was resolved.
///
/// Metric: `lc_stage_leases_total`, `lc_stage_lease_duration_seconds`
/// Labels: `source` (cache, store, created, race_lost)
pub fn record_stage_lease(source: &'static str, duration: Duration) {
    histogram!("lc_stage_lease_duration_seconds", "source" => source)
        .record(duration.as_secs_f64());
    counter!("lc_stage_leases_total", "source" => source).increment(1);
}

/// Metric: `lc_remote_stage_delete_failures_total`
pub fn record_remote_stage_delete_failure() {
    counter!("lc_remote_stage_delete_failures_total").increment(1);
}

// ============================================================================
// Invite Metrics
// ============================================================================

/// Metric: `lc_invites_created_total`
pub fn record_invite_created() {
    counter!("lc_invites_created_total").increment(1);
}

/// Record an invite peek/consume outcome.
///
/// Metric: `lc_invite_outcomes_total`
/// Labels: `operation` (peek, consume), `outcome` (success, replay, or an
/// invite reason)
pub fn record_invite_outcome(operation: &'static str, outcome: &'static str) {
    counter!("lc_invite_outcomes_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Metric: `lc_invite_consume_duration_seconds`
pub fn record_invite_consume_duration(duration: Duration) {
    histogram!("lc_invite_consume_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Sweep Metrics
// ============================================================================

/// Metric: `lc_sweep_deleted_total`
/// Labels: `sweep` (sessions, participants, leases, invites)
pub fn record_sweep_deleted(sweep: &'static str, count: u64) {
    if count > 0 {
        counter!("lc_sweep_deleted_total", "sweep" => sweep).increment(count);
    }
}

/// Metric: `lc_sweep_failures_total`
/// Labels: `sweep`
pub fn record_sweep_failure(sweep: &'static str) {
    counter!("lc_sweep_failures_total", "sweep" => sweep).increment(1);
}
