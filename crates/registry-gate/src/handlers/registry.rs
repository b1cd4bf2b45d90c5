//! Registry API forwarding handler.
//!
//! Runs after the authorization middleware, which guarantees a parsed
//! [`RepositoryRef`] in the request extensions.

use crate::errors::GateError;
use crate::repository::RepositoryRef;
use crate::routes::AppState;
use axum::{
    extract::{Request, State},
    response::Response,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for `/v2/*`: obtain upstream credentials and forward.
#[instrument(skip_all, name = "gate.handlers.registry")]
pub async fn forward_registry_request(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, GateError> {
    let repository = request
        .extensions()
        .get::<RepositoryRef>()
        .cloned()
        .ok_or_else(|| {
            tracing::error!(target: "gate.handlers.registry", "Registry request reached handler without authorization");
            GateError::Internal
        })?;

    let authorization = state
        .upstream_auth
        .authorization_header(&state.config.backend_url, &repository.path)
        .await?;

    state.proxy.forward(request, &authorization).await
}
