//! JWKS client for fetching and caching the identity provider's signing keys.
//!
//! Keys are fetched from the `jwks_uri` advertised in the provider's discovery
//! document and cached with a configurable TTL. A token that names a key ID the
//! cache does not know triggers one refresh, which picks up key rotations
//! before the TTL runs out.

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

/// Errors from key lookup.
#[derive(Debug, Error)]
pub enum JwksError {
    #[error("JWKS endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("signing key not found")]
    UnknownKey,

    #[error("unusable signing key: {0}")]
    InvalidKey(String),
}

/// JSON Web Key from the JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type: "RSA", "EC" or "OKP".
    pub kty: String,

    /// Key ID. Providers with a single key may omit it.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm the key is meant for.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use ("sig" for signing keys).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate, or the OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,
}

impl Jwk {
    /// Build a `jsonwebtoken` decoding key from the key material.
    pub fn decoding_key(&self) -> Result<DecodingKey, JwksError> {
        let missing = |field: &str| JwksError::InvalidKey(format!("{} key missing {field}", self.kty));

        let key = match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or_else(|| missing("n"))?;
                let e = self.e.as_deref().ok_or_else(|| missing("e"))?;
                DecodingKey::from_rsa_components(n, e)
            }
            "EC" => {
                let x = self.x.as_deref().ok_or_else(|| missing("x"))?;
                let y = self.y.as_deref().ok_or_else(|| missing("y"))?;
                DecodingKey::from_ec_components(x, y)
            }
            "OKP" => {
                let x = self.x.as_deref().ok_or_else(|| missing("x"))?;
                DecodingKey::from_ed_components(x)
            }
            other => return Err(JwksError::InvalidKey(format!("unsupported key type {other}"))),
        };

        key.map_err(|e| JwksError::InvalidKey(e.to_string()))
    }

    /// Whether this key may be used for signature verification.
    fn is_signing_key(&self) -> bool {
        self.key_use.as_deref().map_or(true, |u| u == "sig")
    }
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

/// Cached JWKS data with expiry time.
struct CachedJwks {
    keys: Vec<Jwk>,
    expires_at: Instant,
}

impl CachedJwks {
    fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

/// JWKS client for fetching and caching public keys.
pub struct JwksClient {
    jwks_url: String,
    http_client: reqwest::Client,
    cache: Arc<RwLock<Option<CachedJwks>>>,
    cache_ttl: Duration,
}

impl JwksClient {
    /// Create a JWKS client sharing an existing HTTP client.
    pub fn new(jwks_url: String, http_client: reqwest::Client, cache_ttl: Duration) -> Self {
        Self {
            jwks_url,
            http_client,
            cache: Arc::new(RwLock::new(None)),
            cache_ttl,
        }
    }

    /// Candidate verification keys for a token.
    ///
    /// With a key ID, returns that single key, refreshing once if it is not
    /// cached. Without one, returns every cached signing key.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::Unavailable` if the JWKS cannot be fetched and
    /// `JwksError::UnknownKey` if no matching key exists.
    #[instrument(skip(self), fields(kid = ?kid))]
    pub async fn candidate_keys(&self, kid: Option<&str>) -> Result<Vec<Jwk>, JwksError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() {
                    if let Some(keys) = select(cached, kid) {
                        tracing::debug!(target: "gate.auth.jwks", "JWKS cache hit");
                        return Ok(keys);
                    }
                    tracing::debug!(target: "gate.auth.jwks", "Key not found in JWKS cache, refreshing");
                }
            }
        }

        self.refresh_cache().await?;

        let cache = self.cache.read().await;
        if let Some(keys) = cache.as_ref().and_then(|cached| select(cached, kid)) {
            return Ok(keys);
        }

        tracing::warn!(target: "gate.auth.jwks", kid = ?kid, "Key not found in JWKS after refresh");
        Err(JwksError::UnknownKey)
    }

    #[instrument(skip(self))]
    async fn refresh_cache(&self) -> Result<(), JwksError> {
        tracing::debug!(target: "gate.auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gate.auth.jwks", error = %e, "Failed to fetch JWKS");
                JwksError::Unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "gate.auth.jwks",
                status = %response.status(),
                "JWKS endpoint returned error"
            );
            return Err(JwksError::Unavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            tracing::error!(target: "gate.auth.jwks", error = %e, "Failed to parse JWKS response");
            JwksError::Unavailable(e.to_string())
        })?;

        let keys: Vec<Jwk> = jwks.keys.into_iter().filter(Jwk::is_signing_key).collect();

        tracing::info!(
            target: "gate.auth.jwks",
            key_count = keys.len(),
            "JWKS cache refreshed"
        );

        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            keys,
            expires_at: Instant::now() + self.cache_ttl,
        });

        Ok(())
    }
}

fn select(cached: &CachedJwks, kid: Option<&str>) -> Option<Vec<Jwk>> {
    match kid {
        Some(kid) => cached.find(kid).map(|key| vec![key.clone()]),
        None if cached.keys.is_empty() => None,
        None => Some(cached.keys.clone()),
    }
}
