//! Browser login flow against the identity provider.
//!
//! `/oauth` sends the user to the provider's login page; `/oauth/callback`
//! exchanges the returned code and shows the raw ID token, which the user
//! then passes to `podman login` as the password.

use crate::auth::oidc::OidcError;
use crate::errors::GateError;
use crate::routes::AppState;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use rand::RngCore;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

const STATE_BYTES: usize = 32;

fn oauth_unavailable() -> GateError {
    GateError::UpstreamUnavailable("Error getting oauth config".to_string())
}

/// Random, URL-safe `state` value for the authorization request.
fn new_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// Handler for `/oauth`: redirect to the provider's authorization endpoint.
#[instrument(skip_all, name = "gate.handlers.oauth_login")]
pub async fn oauth_login(State(state): State<Arc<AppState>>) -> Result<Response, GateError> {
    let oidc = state.oidc.as_ref().ok_or_else(oauth_unavailable)?;

    let url = oidc.authorization_url(&new_state()).await.map_err(|e| {
        tracing::warn!(target: "gate.handlers.oauth", error = %e, "Cannot build authorization URL");
        oauth_unavailable()
    })?;

    Ok((StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
}

/// Handler for `/oauth/callback`: exchange the code and return the ID token.
#[instrument(skip_all, name = "gate.handlers.oauth_callback")]
pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, GateError> {
    let oidc = state.oidc.as_ref().ok_or_else(oauth_unavailable)?;
    let code = params.code.unwrap_or_default();

    match oidc.exchange_code(&code).await {
        Ok(id_token) => Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            id_token,
        )
            .into_response()),
        Err(OidcError::NotConfigured | OidcError::Discovery(_)) => Err(oauth_unavailable()),
        Err(OidcError::MissingIdToken) => Err(GateError::UpstreamUnavailable(
            "Missing id_token".to_string(),
        )),
        Err(e) => {
            tracing::warn!(target: "gate.handlers.oauth", error = %e, "Code exchange failed");
            Err(GateError::UpstreamUnavailable(
                "Error getting token from identity provider".to_string(),
            ))
        }
    }
}
