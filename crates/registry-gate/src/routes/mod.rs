//! HTTP routes for the registry gate.
//!
//! Defines the Axum router and application state.

use crate::auth::{IdTokenVerifier, IdentityResolver, OidcVerifier};
use crate::authz::AccessPolicy;
use crate::backend::{BackendProxy, TokenAuth, UpstreamAuth};
use crate::cache::{CredentialCache, RedisCache};
use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::errors::GateError;
use crate::handlers;
use crate::middleware::{authorize_registry_request, http_metrics_middleware};
use axum::{
    middleware,
    routing::{any, get},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Bearer token to identity resolution.
    pub resolver: IdentityResolver,

    /// Read-access decisions.
    pub policy: AccessPolicy,

    /// Upstream credential broker.
    pub upstream_auth: Arc<dyn UpstreamAuth>,

    /// Forwarding client for the origin registry.
    pub proxy: Arc<BackendProxy>,

    /// Identity provider client, present when an issuer is configured.
    pub oidc: Option<Arc<OidcVerifier>>,
}

impl AppState {
    /// Wire the production collaborators from configuration.
    ///
    /// No network call is made here; every client connects on first use.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Configuration` if a client cannot be constructed.
    pub fn from_config(config: Config) -> Result<Self, GateError> {
        let cluster = Arc::new(
            ClusterClient::from_config(&config)
                .map_err(|e| GateError::Configuration(format!("cluster client: {e}")))?,
        );

        let oidc = OidcVerifier::from_config(&config).map(Arc::new);
        let idp = oidc.clone().map(|verifier| {
            let issuer = verifier.issuer().to_string();
            let verifier: Arc<dyn IdTokenVerifier> = verifier;
            (issuer, verifier)
        });

        let cache: Option<Arc<dyn CredentialCache>> = if config.cache_servers.is_empty() {
            tracing::info!(target: "gate.startup", "No cache servers configured, upstream tokens will not be cached");
            None
        } else {
            let cache = RedisCache::new(&config.cache_servers)
                .map_err(|e| GateError::Configuration(format!("credential cache: {e}")))?;
            tracing::info!(target: "gate.startup", shards = cache.shard_count(), "Credential cache configured");
            Some(Arc::new(cache))
        };

        Ok(Self {
            resolver: IdentityResolver::new(idp, cluster.clone()),
            policy: AccessPolicy::new(cluster),
            upstream_auth: Arc::new(TokenAuth::from_config(&config, cache)),
            proxy: Arc::new(BackendProxy::new(
                config.backend_url.clone(),
                config.upstream_timeout,
            )),
            oidc,
            config,
        })
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/v2`, `/v2/`, `/v2/*path` - Registry API, behind the authorization middleware
/// - `/_ping` - Liveness
/// - `/auth` - Token endpoint for registry clients
/// - `/oauth`, `/oauth/callback` - Browser login flow
/// - `/metrics` - Prometheus metrics
/// - TraceLayer for request logging
/// - HTTP metrics middleware (outermost)
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let public_routes = Router::new()
        .route("/_ping", any(handlers::ping))
        .route("/auth", any(handlers::issue_token))
        .route("/oauth", any(handlers::oauth_login))
        .route("/oauth/callback", any(handlers::oauth_callback))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let registry_routes = Router::new()
        .route("/v2", any(handlers::forward_registry_request))
        .route("/v2/", any(handlers::forward_registry_request))
        .route("/v2/*path", any(handlers::forward_registry_request))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authorize_registry_request,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TraceLayer - Log request details
    // 2. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(registry_routes)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}
