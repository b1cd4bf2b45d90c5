//! Authorization middleware for registry API routes.
//!
//! Every `/v2` request passes through here before anything is forwarded:
//!
//! 1. Require a bearer token, otherwise challenge with the gate's token realm.
//! 2. Answer the API root (`/v2`, `/v2/`) locally.
//! 3. Parse the repository and check the tenant namespace.
//! 4. Resolve the token to an identity.
//! 5. Check read access on the repository's namespace.
//!
//! On success the [`Identity`] and [`RepositoryRef`] are stored in request
//! extensions for the forwarding handler.

use crate::auth::Identity;
use crate::errors::{GateError, API_VERSION, API_VERSION_HEADER};
use crate::repository::RepositoryRef;
use crate::routes::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

const NO_ACCESS: &str = "Proxy has no access to the requested resource";

/// Bearer token from the `Authorization` header.
///
/// The scheme is compared case-insensitively and the token must be non-empty.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn is_registry_path(path: &str) -> bool {
    path == "/v2" || path.starts_with("/v2/")
}

fn api_root_response() -> Response {
    let mut response = (StatusCode::OK, Json(serde_json::json!({}))).into_response();
    response.headers_mut().insert(
        API_VERSION_HEADER.clone(),
        HeaderValue::from_static(API_VERSION),
    );
    response
}

/// Gate a registry API request on identity and read access.
#[instrument(skip_all, name = "gate.middleware.authz", fields(method = %req.method()))]
pub async fn authorize_registry_request(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, GateError> {
    let path = req.uri().path().to_string();
    if !is_registry_path(&path) {
        return Ok(next.run(req).await);
    }

    let token = extract_bearer_token(req.headers())
        .map(ToString::to_string)
        .ok_or_else(|| {
            tracing::debug!(target: "gate.middleware.authz", "No bearer token, issuing challenge");
            GateError::MissingToken {
                realm: state.config.token_realm(),
            }
        })?;

    if path == "/v2" || path == "/v2/" {
        return Ok(api_root_response());
    }

    let repository = RepositoryRef::parse(&path).ok_or_else(|| {
        tracing::debug!(target: "gate.middleware.authz", "No repository in request path");
        GateError::Unauthorized(NO_ACCESS.to_string())
    })?;

    if repository.tenant_namespace != state.config.backend_namespace {
        tracing::info!(
            target: "gate.middleware.authz",
            tenant = %repository.tenant_namespace,
            "Request for a tenant outside the backend namespace"
        );
        return Err(GateError::Unauthorized(format!(
            "Proxy has no access to {}",
            repository.tenant_namespace
        )));
    }

    let namespace = repository
        .authorization_namespace
        .clone()
        .ok_or_else(|| GateError::Unauthorized(NO_ACCESS.to_string()))?;

    let identity: Identity = state
        .resolver
        .resolve(&token)
        .await
        .ok_or_else(|| GateError::Unauthenticated("Token is invalid or expired".to_string()))?;

    if !state.policy.is_allowed(&identity, &namespace).await {
        return Err(GateError::Unauthorized(format!(
            "You do not have permission to read imagerepositories in {namespace}"
        )));
    }

    tracing::info!(
        target: "gate.middleware.authz",
        namespace = %namespace,
        "Registry request authorized"
    );

    req.extensions_mut().insert(identity);
    req.extensions_mut().insert(repository);
    Ok(next.run(req).await)
}
