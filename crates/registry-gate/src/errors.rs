//! Gate error types.
//!
//! Every error renders as a Distribution API error body so that registry
//! clients (podman, docker, skopeo) can surface the message. Causes from the
//! cluster, the identity provider and the backend are logged server-side and
//! never copied into the response.

use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Distribution error code for authentication and authorization failures.
pub const CODE_UNAUTHORIZED: &str = "UNAUTHORIZED";

/// Distribution error code for backend or collaborator failures.
pub const CODE_UNAVAILABLE: &str = "UNAVAILABLE";

/// Distribution error code for anything else.
pub const CODE_UNKNOWN: &str = "UNKNOWN";

/// Header every registry API response carries.
pub static API_VERSION_HEADER: HeaderName =
    HeaderName::from_static("docker-distribution-api-version");

/// Value of [`API_VERSION_HEADER`].
pub const API_VERSION: &str = "registry/2.0";

/// Gate error type.
///
/// Maps to HTTP status codes:
/// - `MissingToken`, `Unauthenticated`, `Unauthorized`: 401
/// - `UpstreamUnavailable`, `Configuration`: 503
/// - `Internal`: 500
#[derive(Debug, Error)]
pub enum GateError {
    /// No bearer token on a protected request. Renders a challenge pointing at
    /// the token endpoint.
    #[error("Access to the requested resource is not authorized")]
    MissingToken { realm: String },

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal server error")]
    Internal,
}

impl GateError {
    /// Distribution error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            GateError::MissingToken { .. }
            | GateError::Unauthenticated(_)
            | GateError::Unauthorized(_) => CODE_UNAUTHORIZED,
            GateError::UpstreamUnavailable(_) | GateError::Configuration(_) => CODE_UNAVAILABLE,
            GateError::Internal => CODE_UNKNOWN,
        }
    }
}

/// Body of a Distribution API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorEntry>,
}

#[derive(Debug, Serialize)]
pub struct ErrorEntry {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub detail: Vec<String>,
}

impl ErrorResponse {
    pub fn single(code: &str, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ErrorEntry {
                code: code.to_string(),
                message: message.into(),
                detail: Vec::new(),
            }],
        }
    }
}

/// Status for a Distribution error code.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        CODE_UNAUTHORIZED => StatusCode::UNAUTHORIZED,
        CODE_UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render a Distribution error response for `code`.
pub fn distribution_error(code: &str, message: impl Into<String>) -> Response {
    let mut response = (
        status_for_code(code),
        Json(ErrorResponse::single(code, message)),
    )
        .into_response();
    response.headers_mut().insert(
        API_VERSION_HEADER.clone(),
        HeaderValue::from_static(API_VERSION),
    );
    response
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let message = match &self {
            GateError::Configuration(reason) => {
                tracing::error!(target: "gate.config", reason = %reason, "Request failed on missing configuration");
                "Server error encountered while fetching credentials".to_string()
            }
            GateError::UpstreamUnavailable(reason) => {
                tracing::warn!(target: "gate.availability", reason = %reason, "Upstream unavailable");
                reason.clone()
            }
            other => other.to_string(),
        };

        let mut response = distribution_error(self.code(), message);

        if let GateError::MissingToken { realm } = &self {
            let challenge = format!("Bearer realm=\"{realm}\"");
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }

        response
    }
}
