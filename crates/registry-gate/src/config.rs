//! Gate configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use reqwest::Url;
use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:4000";

/// Default timeout for cluster, OIDC and token-exchange calls.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 10;

/// Upper bound for `UPSTREAM_TIMEOUT_SECONDS`.
pub const MAX_UPSTREAM_TIMEOUT_SECONDS: u64 = 300;

/// Default JWKS cache TTL.
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 300;

/// Gate configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:4000").
    pub bind_address: String,

    /// Externally reachable URL of this proxy, without trailing slash.
    pub proxy_url: String,

    /// Backend registry base URL.
    pub backend_url: Url,

    /// Tenant namespace on the backend that this instance fronts.
    pub backend_namespace: String,

    /// Backend robot account used for the token exchange.
    pub backend_username: Option<String>,

    pub backend_password: Option<SecretString>,

    /// Cluster API base URL for token and access reviews.
    pub cluster_url: Url,

    /// Bearer token the gate presents to the cluster API.
    pub cluster_token: Option<SecretString>,

    /// Issuer of interactive-login ID tokens. When unset, every token goes to
    /// cluster token review.
    pub oidc_issuer_url: Option<String>,

    pub oidc_client_id: Option<String>,

    pub oidc_client_secret: Option<SecretString>,

    /// Redis endpoints for the upstream credential cache. Empty disables caching.
    pub cache_servers: Vec<String>,

    /// Timeout for cluster, OIDC and token-exchange calls.
    pub upstream_timeout: Duration,

    /// How long fetched JWKS stay cached.
    pub jwks_cache_ttl: Duration,
}

impl Config {
    /// URL the missing-token challenge points clients at.
    pub fn token_realm(&self) -> String {
        format!("{}/auth", self.proxy_url)
    }

    /// Redirect URI registered with the identity provider.
    pub fn oauth_redirect_url(&self) -> String {
        format!("{}/oauth/callback", self.proxy_url)
    }
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("proxy_url", &self.proxy_url)
            .field("backend_url", &self.backend_url.as_str())
            .field("backend_namespace", &self.backend_namespace)
            .field("backend_username", &self.backend_username)
            .field(
                "backend_password",
                &self.backend_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("cluster_url", &self.cluster_url.as_str())
            .field(
                "cluster_token",
                &self.cluster_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("oidc_issuer_url", &self.oidc_issuer_url)
            .field("oidc_client_id", &self.oidc_client_id)
            .field(
                "oidc_client_secret",
                &self.oidc_client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("cache_servers", &self.cache_servers.len())
            .field("upstream_timeout", &self.upstream_timeout)
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid URL configuration: {0}")]
    InvalidUrl(String),

    #[error("Invalid upstream timeout configuration: {0}")]
    InvalidUpstreamTimeout(String),

    #[error("Invalid JWKS cache TTL configuration: {0}")]
    InvalidJwksCacheTtl(String),
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("{name} must be an absolute URL, got '{value}': {e}")))?;
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "{name} must include a host, got '{value}'"
        )));
    }
    Ok(url)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address =
            optional(vars, "BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let proxy_url = required(vars, "PROXY_URL")?
            .trim_end_matches('/')
            .to_string();

        let backend_url = parse_url("BACKEND_URL", &required(vars, "BACKEND_URL")?)?;
        let backend_namespace = required(vars, "BACKEND_NAMESPACE")?;
        let backend_username = optional(vars, "BACKEND_USERNAME");
        let backend_password = optional(vars, "BACKEND_PASSWORD").map(SecretString::from);

        let cluster_url = parse_url("CLUSTER_URL", &required(vars, "CLUSTER_URL")?)?;
        let cluster_token = optional(vars, "CLUSTER_TOKEN").map(SecretString::from);

        let oidc_issuer_url = optional(vars, "OIDC_ISSUER_URL");
        if let Some(issuer) = &oidc_issuer_url {
            parse_url("OIDC_ISSUER_URL", issuer)?;
        }
        let oidc_client_id = optional(vars, "OIDC_CLIENT_ID");
        let oidc_client_secret = optional(vars, "OIDC_CLIENT_SECRET").map(SecretString::from);

        let cache_servers = optional(vars, "CACHE_SERVERS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        // Parse upstream timeout with validation
        let upstream_timeout_seconds = if let Some(value_str) = vars.get("UPSTREAM_TIMEOUT_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidUpstreamTimeout(format!(
                    "UPSTREAM_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidUpstreamTimeout(
                    "UPSTREAM_TIMEOUT_SECONDS must be greater than 0".to_string(),
                ));
            }

            if value > MAX_UPSTREAM_TIMEOUT_SECONDS {
                return Err(ConfigError::InvalidUpstreamTimeout(format!(
                    "UPSTREAM_TIMEOUT_SECONDS must not exceed {} seconds, got {}",
                    MAX_UPSTREAM_TIMEOUT_SECONDS, value
                )));
            }

            value
        } else {
            DEFAULT_UPSTREAM_TIMEOUT_SECONDS
        };

        let jwks_cache_ttl_seconds = if let Some(value_str) = vars.get("JWKS_CACHE_TTL_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwksCacheTtl(format!(
                    "JWKS_CACHE_TTL_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidJwksCacheTtl(
                    "JWKS_CACHE_TTL_SECONDS must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_JWKS_CACHE_TTL_SECONDS
        };

        Ok(Config {
            bind_address,
            proxy_url,
            backend_url,
            backend_namespace,
            backend_username,
            backend_password,
            cluster_url,
            cluster_token,
            oidc_issuer_url,
            oidc_client_id,
            oidc_client_secret,
            cache_servers,
            upstream_timeout: Duration::from_secs(upstream_timeout_seconds),
            jwks_cache_ttl: Duration::from_secs(jwks_cache_ttl_seconds),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("PROXY_URL".to_string(), "https://gate.example.com/".to_string()),
            ("BACKEND_URL".to_string(), "https://quay.example.com".to_string()),
            ("BACKEND_NAMESPACE".to_string(), "tenant".to_string()),
            ("CLUSTER_URL".to_string(), "https://api.cluster.example:6443".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.proxy_url, "https://gate.example.com");
        assert_eq!(config.backend_url.host_str(), Some("quay.example.com"));
        assert_eq!(config.backend_namespace, "tenant");
        assert!(config.backend_username.is_none());
        assert!(config.backend_password.is_none());
        assert!(config.cluster_token.is_none());
        assert!(config.oidc_issuer_url.is_none());
        assert!(config.cache_servers.is_empty());
        assert_eq!(
            config.upstream_timeout,
            Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECONDS)
        );
        assert_eq!(
            config.jwks_cache_ttl,
            Duration::from_secs(DEFAULT_JWKS_CACHE_TTL_SECONDS)
        );
        assert_eq!(config.token_realm(), "https://gate.example.com/auth");
        assert_eq!(
            config.oauth_redirect_url(),
            "https://gate.example.com/oauth/callback"
        );
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("BACKEND_USERNAME".to_string(), "tenant+robot".to_string());
        vars.insert("BACKEND_PASSWORD".to_string(), "robot-secret".to_string());
        vars.insert("CLUSTER_TOKEN".to_string(), "sa-token".to_string());
        vars.insert("OIDC_ISSUER_URL".to_string(), "https://dex.example.com".to_string());
        vars.insert("OIDC_CLIENT_ID".to_string(), "registry-gate".to_string());
        vars.insert("OIDC_CLIENT_SECRET".to_string(), "client-secret".to_string());
        vars.insert(
            "CACHE_SERVERS".to_string(),
            "redis://cache-0:6379, redis://cache-1:6379,".to_string(),
        );
        vars.insert("UPSTREAM_TIMEOUT_SECONDS".to_string(), "30".to_string());
        vars.insert("JWKS_CACHE_TTL_SECONDS".to_string(), "60".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.backend_username.as_deref(), Some("tenant+robot"));
        assert_eq!(
            config.backend_password.as_ref().unwrap().expose_secret(),
            "robot-secret"
        );
        assert_eq!(config.cluster_token.as_ref().unwrap().expose_secret(), "sa-token");
        assert_eq!(config.oidc_issuer_url.as_deref(), Some("https://dex.example.com"));
        assert_eq!(config.oidc_client_id.as_deref(), Some("registry-gate"));
        assert_eq!(
            config.cache_servers,
            vec!["redis://cache-0:6379", "redis://cache-1:6379"]
        );
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
        assert_eq!(config.jwks_cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_missing_required_vars() {
        for name in ["PROXY_URL", "BACKEND_URL", "BACKEND_NAMESPACE", "CLUSTER_URL"] {
            let mut vars = base_vars();
            vars.remove(name);
            let result = Config::from_vars(&vars);
            assert!(
                matches!(&result, Err(ConfigError::MissingEnvVar(v)) if v == name),
                "expected missing {name}, got {result:?}"
            );
        }
    }

    #[test]
    fn test_blank_required_var_is_missing() {
        let mut vars = base_vars();
        vars.insert("BACKEND_NAMESPACE".to_string(), "  ".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(v)) if v == "BACKEND_NAMESPACE"
        ));
    }

    #[test]
    fn test_invalid_backend_url() {
        let mut vars = base_vars();
        vars.insert("BACKEND_URL".to_string(), "quay.example.com".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidUrl(msg)) if msg.contains("BACKEND_URL")
        ));
    }

    #[test]
    fn test_invalid_issuer_url() {
        let mut vars = base_vars();
        vars.insert("OIDC_ISSUER_URL".to_string(), "not a url".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidUrl(msg)) if msg.contains("OIDC_ISSUER_URL")
        ));
    }

    #[test]
    fn test_upstream_timeout_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("UPSTREAM_TIMEOUT_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidUpstreamTimeout(msg)) if msg.contains("must be greater than 0")
        ));
    }

    #[test]
    fn test_upstream_timeout_rejects_too_large() {
        let mut vars = base_vars();
        vars.insert("UPSTREAM_TIMEOUT_SECONDS".to_string(), "301".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidUpstreamTimeout(msg)) if msg.contains("must not exceed 300")
        ));
    }

    #[test]
    fn test_upstream_timeout_rejects_non_numeric() {
        let mut vars = base_vars();
        vars.insert("UPSTREAM_TIMEOUT_SECONDS".to_string(), "ten".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidUpstreamTimeout(msg)) if msg.contains("must be a valid positive integer")
        ));
    }

    #[test]
    fn test_jwks_cache_ttl_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("JWKS_CACHE_TTL_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwksCacheTtl(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert("BACKEND_PASSWORD".to_string(), "robot-secret".to_string());
        vars.insert("CLUSTER_TOKEN".to_string(), "sa-token".to_string());
        vars.insert("OIDC_CLIENT_SECRET".to_string(), "client-secret".to_string());
        vars.insert(
            "CACHE_SERVERS".to_string(),
            "redis://:cachepass@cache-0:6379".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();
        let debug_str = format!("{config:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("robot-secret"));
        assert!(!debug_str.contains("sa-token"));
        assert!(!debug_str.contains("client-secret"));
        assert!(!debug_str.contains("cachepass"));
    }
}
