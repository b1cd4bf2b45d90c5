//! Metric definitions for the registry gate.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gate_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods only
//! - `endpoint`: normalized, repository names never appear
//! - `source`: `identity_provider`, `token_review`
//! - `verb`: `get`, `list`, `watch`
//! - `outcome` / `result` / `status`: fixed sets per metric
//!
//! Usernames, namespaces and tokens are never used as label values.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return its handle for `/metrics`.
///
/// Must be called before any metric is recorded.
///
/// # Errors
///
/// Returns error if the recorder cannot be installed (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("gate_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Exchanges go over the network to the backend's token service
        .set_buckets_for_metric(
            Matcher::Prefix("gate_token_exchange".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000],
        )
        .map_err(|e| format!("Failed to set token exchange buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `gate_http_requests_total`, `gate_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("gate_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("gate_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        300..=399 => "redirect",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Collapse a request path into a bounded endpoint label.
///
/// Registry paths keep only the distribution API operation; the repository
/// name is replaced with a placeholder.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/_ping" | "/auth" | "/oauth" | "/oauth/callback" | "/metrics" => path.to_string(),
        "/v2" | "/v2/" => "/v2/".to_string(),
        _ => normalize_registry_endpoint(path),
    }
}

fn normalize_registry_endpoint(path: &str) -> String {
    if !path.starts_with("/v2/") {
        return "/other".to_string();
    }

    for operation in ["manifests", "blobs", "tags", "referrers"] {
        if path.contains(&format!("/{operation}/")) {
            return format!("/v2/{{repository}}/{operation}");
        }
    }

    "/v2/{repository}".to_string()
}

// ============================================================================
// Authentication and Authorization Metrics
// ============================================================================

/// Record the outcome of resolving a bearer token to an identity.
///
/// Metric: `gate_identity_resolutions_total`
/// Labels: `source`, `outcome` ("verified", "rejected")
pub fn record_identity_resolution(source: &str, outcome: &str) {
    counter!("gate_identity_resolutions_total",
        "source" => source.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a single access review.
///
/// Metric: `gate_access_reviews_total`
/// Labels: `verb`, `outcome` ("allowed", "denied", "error")
pub fn record_access_review(verb: &str, outcome: &str) {
    counter!("gate_access_reviews_total",
        "verb" => verb.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the final read-access decision for a request.
///
/// Metric: `gate_authorization_decisions_total`
/// Labels: `decision` ("allowed", "denied")
pub fn record_authorization_decision(allowed: bool) {
    let decision = if allowed { "allowed" } else { "denied" };
    counter!("gate_authorization_decisions_total",
        "decision" => decision
    )
    .increment(1);
}

// ============================================================================
// Backend Credential Metrics
// ============================================================================

/// Record a credential cache lookup.
///
/// Metric: `gate_credential_cache_total`
/// Labels: `result` ("hit", "miss", "error")
pub fn record_credential_cache(result: &str) {
    counter!("gate_credential_cache_total",
        "result" => result.to_string()
    )
    .increment(1);
}

/// Record a token exchange against the backend's token service.
///
/// Metric: `gate_token_exchanges_total`, `gate_token_exchange_duration_seconds`
/// Labels: `status` ("success", "error")
pub fn record_token_exchange(status: &str, duration: Duration) {
    histogram!("gate_token_exchange_duration_seconds").record(duration.as_secs_f64());

    counter!("gate_token_exchanges_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a request forwarded to the origin registry.
///
/// Metric: `gate_proxied_requests_total`
/// Labels: `status` (origin status class, or "transport_error")
pub fn record_proxied_request(status: Option<u16>) {
    let status = match status {
        Some(code @ 100..=599) => format!("{}xx", code / 100),
        Some(_) => "invalid".to_string(),
        None => "transport_error".to_string(),
    };
    counter!("gate_proxied_requests_total",
        "status" => status
    )
    .increment(1);
}
