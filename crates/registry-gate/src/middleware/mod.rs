//! HTTP middleware for the registry gate.
//!
//! - `authz` - identity and read-access enforcement on `/v2` routes
//! - `http_metrics` - request metrics for every response

pub mod authz;
pub mod http_metrics;

pub use authz::{authorize_registry_request, extract_bearer_token};
pub use http_metrics::http_metrics_middleware;
