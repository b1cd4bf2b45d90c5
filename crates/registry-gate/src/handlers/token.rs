//! Token endpoint for registry clients.
//!
//! `podman login` and `docker login` send the user's bearer token as the
//! password of HTTP basic auth. The endpoint verifies that token and hands it
//! back in the Docker token response format, so later requests carry it as a
//! bearer token.

use crate::errors::GateError;
use crate::routes::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Body returned to a client whose token verified.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Username and password from an HTTP basic `Authorization` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Handler for `/auth`, any method.
#[instrument(skip_all, name = "gate.handlers.token")]
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, GateError> {
    let (_, token) = basic_credentials(&headers).ok_or_else(|| {
        GateError::Unauthenticated("No basic auth credentials provided".to_string())
    })?;

    if state.resolver.resolve(&token).await.is_none() {
        return Err(GateError::Unauthenticated(
            "Token is invalid or expired".to_string(),
        ));
    }

    tracing::info!(target: "gate.handlers.token", "Issued token for verified caller");
    Ok(Json(TokenResponse { token }))
}
