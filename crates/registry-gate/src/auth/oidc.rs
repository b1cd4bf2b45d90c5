//! OIDC identity provider client.
//!
//! Covers the three interactions the gate has with the identity provider:
//! discovery of the provider metadata, verification of ID tokens presented as
//! bearer credentials, and the authorization-code exchange behind the browser
//! login flow.
//!
//! # Security
//!
//! - Only asymmetric signature algorithms are accepted
//! - `iss` must equal the configured issuer, `aud` must contain the client ID
//! - `exp` is mandatory; `iat` may be at most the default clock skew ahead
//! - The discovery document's issuer must match the configured issuer

use crate::auth::identity::Identity;
use crate::auth::jwks::{JwksClient, JwksError};
use crate::config::Config;
use common::jwt::{validate_iat, DEFAULT_CLOCK_SKEW, MAX_JWT_SIZE_BYTES};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Scopes requested during the browser login flow.
pub const LOGIN_SCOPES: &str = "openid email groups";

/// Errors from the identity provider client.
#[derive(Debug, Error)]
pub enum OidcError {
    #[error("OIDC client is not configured")]
    NotConfigured,

    #[error("provider discovery failed: {0}")]
    Discovery(String),

    #[error(transparent)]
    Jwks(#[from] JwksError),

    #[error("ID token rejected: {0}")]
    InvalidToken(String),

    #[error("code exchange failed: {0}")]
    Exchange(String),

    #[error("token response carried no id_token")]
    MissingIdToken,
}

/// Verifies ID tokens issued by the configured identity provider.
#[async_trait::async_trait]
pub trait IdTokenVerifier: Send + Sync {
    /// Verify `token` and return the identity it asserts.
    async fn verify(&self, token: &str) -> Result<Identity, OidcError>;
}

/// Subset of the OpenID Provider metadata the gate uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

/// Claims read from a verified ID token.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    iat: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    #[serde(default)]
    id_token: Option<String>,
}

struct Provider {
    metadata: ProviderMetadata,
    jwks: JwksClient,
}

/// OIDC client bound to one issuer.
pub struct OidcVerifier {
    issuer: String,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    redirect_url: String,
    http_client: reqwest::Client,
    jwks_cache_ttl: Duration,
    provider: OnceCell<Provider>,
}

impl OidcVerifier {
    /// Build the client from configuration. `None` when no issuer is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let issuer = config.oidc_issuer_url.clone()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gate.auth.oidc", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Some(Self {
            issuer,
            client_id: config.oidc_client_id.clone(),
            client_secret: config.oidc_client_secret.clone(),
            redirect_url: config.oauth_redirect_url(),
            http_client,
            jwks_cache_ttl: config.jwks_cache_ttl,
            provider: OnceCell::new(),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Provider metadata, discovered on first use.
    ///
    /// A failed discovery is not remembered; the next call retries.
    async fn provider(&self) -> Result<&Provider, OidcError> {
        self.provider
            .get_or_try_init(|| async {
                let metadata = self.discover().await?;
                let jwks = JwksClient::new(
                    metadata.jwks_uri.clone(),
                    self.http_client.clone(),
                    self.jwks_cache_ttl,
                );
                Ok(Provider { metadata, jwks })
            })
            .await
    }

    #[instrument(skip_all, name = "gate.auth.oidc.discover")]
    async fn discover(&self) -> Result<ProviderMetadata, OidcError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            self.issuer.trim_end_matches('/')
        );

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            tracing::error!(target: "gate.auth.oidc", error = %e, "Failed to fetch provider metadata");
            OidcError::Discovery(e.to_string())
        })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "gate.auth.oidc",
                status = %response.status(),
                "Discovery endpoint returned error"
            );
            return Err(OidcError::Discovery(format!("status {}", response.status())));
        }

        let metadata: ProviderMetadata = response.json().await.map_err(|e| {
            tracing::error!(target: "gate.auth.oidc", error = %e, "Failed to parse provider metadata");
            OidcError::Discovery(e.to_string())
        })?;

        if metadata.issuer != self.issuer {
            tracing::error!(
                target: "gate.auth.oidc",
                expected = %self.issuer,
                advertised = %metadata.issuer,
                "Provider issuer does not match configuration"
            );
            return Err(OidcError::Discovery("issuer mismatch".to_string()));
        }

        tracing::info!(target: "gate.auth.oidc", "Provider metadata discovered");
        Ok(metadata)
    }

    /// URL of the provider's login page for the authorization-code flow.
    ///
    /// # Errors
    ///
    /// `NotConfigured` without a client ID, `Discovery` if the provider cannot
    /// be reached or advertises an unusable endpoint.
    pub async fn authorization_url(&self, state: &str) -> Result<Url, OidcError> {
        let client_id = self.client_id.as_deref().ok_or(OidcError::NotConfigured)?;
        let provider = self.provider().await?;

        let mut url = Url::parse(&provider.metadata.authorization_endpoint)
            .map_err(|e| OidcError::Discovery(format!("invalid authorization endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", LOGIN_SCOPES)
            .append_pair("state", state);

        Ok(url)
    }

    /// Exchange an authorization code for the raw ID token.
    #[instrument(skip_all, name = "gate.auth.oidc.exchange")]
    pub async fn exchange_code(&self, code: &str) -> Result<String, OidcError> {
        let client_id = self.client_id.as_deref().ok_or(OidcError::NotConfigured)?;
        let provider = self.provider().await?;

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
        ];

        let response = self
            .http_client
            .post(&provider.metadata.token_endpoint)
            .basic_auth(
                client_id,
                self.client_secret.as_ref().map(|s| s.expose_secret().to_string()),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gate.auth.oidc", error = %e, "Token endpoint request failed");
                OidcError::Exchange(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::warn!(
                target: "gate.auth.oidc",
                status = %response.status(),
                "Token endpoint rejected code exchange"
            );
            return Err(OidcError::Exchange(format!("status {}", response.status())));
        }

        let body: TokenEndpointResponse = response.json().await.map_err(|e| {
            tracing::error!(target: "gate.auth.oidc", error = %e, "Failed to parse token endpoint response");
            OidcError::Exchange(e.to_string())
        })?;

        body.id_token
            .filter(|t| !t.is_empty())
            .ok_or(OidcError::MissingIdToken)
    }
}

fn is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

#[async_trait::async_trait]
impl IdTokenVerifier for OidcVerifier {
    #[instrument(skip_all, name = "gate.auth.oidc.verify")]
    async fn verify(&self, token: &str) -> Result<Identity, OidcError> {
        let client_id = self.client_id.as_deref().ok_or(OidcError::NotConfigured)?;

        if token.len() > MAX_JWT_SIZE_BYTES {
            return Err(OidcError::InvalidToken("token too large".to_string()));
        }

        let header = decode_header(token).map_err(|e| OidcError::InvalidToken(e.to_string()))?;
        if !is_asymmetric(header.alg) {
            tracing::warn!(target: "gate.auth.oidc", alg = ?header.alg, "Rejected symmetric token algorithm");
            return Err(OidcError::InvalidToken("unsupported algorithm".to_string()));
        }

        let provider = self.provider().await?;
        let keys = provider.jwks.candidate_keys(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[client_id]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let alg_name = format!("{:?}", header.alg);
        let mut last_error = String::from("no usable signing key");

        for jwk in keys {
            if jwk.alg.as_deref().is_some_and(|alg| alg != alg_name) {
                continue;
            }
            let key = match jwk.decoding_key() {
                Ok(key) => key,
                Err(e) => {
                    tracing::debug!(target: "gate.auth.oidc", error = %e, "Skipping unusable JWK");
                    last_error = e.to_string();
                    continue;
                }
            };

            match decode::<IdTokenClaims>(token, &key, &validation) {
                Ok(data) => return identity_from_claims(data.claims),
                Err(e) => last_error = e.to_string(),
            }
        }

        tracing::debug!(target: "gate.auth.oidc", error = %last_error, "ID token verification failed");
        Err(OidcError::InvalidToken(last_error))
    }
}

fn identity_from_claims(claims: IdTokenClaims) -> Result<Identity, OidcError> {
    if let Some(iat) = claims.iat {
        validate_iat(iat, DEFAULT_CLOCK_SKEW)
            .map_err(|_| OidcError::InvalidToken("iat too far in the future".to_string()))?;
    }

    let email = claims.email.unwrap_or_default();
    Identity::new(email, claims.groups)
        .ok_or_else(|| OidcError::InvalidToken("missing email claim".to_string()))
}

pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock ID token verifier for unit testing.
    pub struct MockIdTokenVerifier {
        identity: Option<Identity>,
        call_count: AtomicUsize,
    }

    impl MockIdTokenVerifier {
        /// Create a mock that accepts every token as `identity`.
        pub fn accepting(identity: Identity) -> Self {
            Self {
                identity: Some(identity),
                call_count: AtomicUsize::new(0),
            }
        }

        /// Create a mock that rejects every token.
        pub fn rejecting() -> Self {
            Self {
                identity: None,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl IdTokenVerifier for MockIdTokenVerifier {
        async fn verify(&self, _token: &str) -> Result<Identity, OidcError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.identity
                .clone()
                .ok_or_else(|| OidcError::InvalidToken("mock rejection".to_string()))
        }
    }
}
