//! Builders for the tokens the gate sees in tests.
//!
//! - ID tokens signed by a mock identity provider
//! - Opaque-signature tokens whose claims the gate only peeks at (cluster
//!   service account tokens, backend registry tokens)

use crate::crypto_fixtures::TestSigningKey;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Map, Value};

/// Builder for identity-provider ID tokens.
///
/// # Example
/// ```rust,ignore
/// let token = IdTokenBuilder::new(&idp.uri(), "registry-gate")
///     .email("alice@example.com")
///     .groups(&["devs"])
///     .sign(&key);
/// ```
pub struct IdTokenBuilder {
    issuer: String,
    audience: String,
    subject: String,
    email: Option<String>,
    groups: Vec<String>,
    expires_in: i64,
}

impl IdTokenBuilder {
    /// Token for `audience` issued by `issuer`, valid for an hour, with no
    /// email or groups.
    pub fn new(issuer: &str, audience: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            subject: "CgVhbGljZRIEbG9jYWw".to_string(),
            email: None,
            groups: Vec::new(),
            expires_in: 3600,
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(ToString::to_string).collect();
        self
    }

    /// Seconds from now until `exp`. Negative values build an expired token.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.expires_in = seconds;
        self
    }

    /// Claims as a JSON value.
    pub fn claims(&self) -> Value {
        let now = Utc::now().timestamp();
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(self.issuer));
        claims.insert("aud".to_string(), json!(self.audience));
        claims.insert("sub".to_string(), json!(self.subject));
        claims.insert("iat".to_string(), json!(now.min(now + self.expires_in)));
        claims.insert("exp".to_string(), json!(now + self.expires_in));
        if let Some(email) = &self.email {
            claims.insert("email".to_string(), json!(email));
        }
        if !self.groups.is_empty() {
            claims.insert("groups".to_string(), json!(self.groups));
        }
        Value::Object(claims)
    }

    pub fn sign(self, key: &TestSigningKey) -> String {
        key.sign(&self.claims())
    }
}

/// JWT-shaped token with the given claims and a meaningless signature.
///
/// The gate only reads such tokens to route or cache them; the real check
/// happens at the party that issued them.
pub fn unsigned_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// Backend registry bearer token expiring `expires_in_secs` from now.
pub fn registry_token(expires_in_secs: i64) -> String {
    let now = Utc::now().timestamp();
    unsigned_token(&json!({
        "iss": "quay",
        "sub": "tenant+robot",
        "iat": now,
        "exp": now + expires_in_secs,
        "access": [{ "type": "repository", "actions": ["pull"] }],
    }))
}

/// Cluster service account token, routed to token review by the gate.
pub fn service_account_token(name: &str) -> String {
    let now = Utc::now().timestamp();
    unsigned_token(&json!({
        "iss": "https://kubernetes.default.svc",
        "sub": format!("system:serviceaccount:{name}"),
        "iat": now,
        "exp": now + 3600,
    }))
}
