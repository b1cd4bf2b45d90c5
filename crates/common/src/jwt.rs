//! JWT utilities shared across the registry-gate crates.
//!
//! This module covers the parts of token handling that do not need a key:
//! - Size limits applied before any parsing
//! - Clock skew constants for `iat` validation
//! - Unverified claim decoding for routing and local validity checks
//!
//! # Security
//!
//! [`UnverifiedClaims`] is decoded WITHOUT checking the signature. It may be used
//! to pick a trust source for a caller token, or to decide whether a token that
//! this process obtained itself is still fresh. It must never be treated as an
//! authenticated identity, and there is no conversion from it into one.
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{decode_unverified, is_valid_token};
//!
//! let claims = decode_unverified(token)?;
//! if claims.issuer() == Some(configured_issuer) {
//!     // hand the token to the OIDC verifier
//! }
//!
//! if !is_valid_token(&cached) {
//!     // fetch a fresh upstream token
//! }
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected before base64 decoding, so an oversized
/// header cannot force large allocations.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes).
///
/// Tokens with an `iat` more than this far in the future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Minimum remaining lifetime for a token to count as usable.
///
/// A token expiring within this window is treated as already expired, and the
/// same margin is subtracted from cache TTLs.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(30);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while decoding or checking a JWT.
///
/// Display strings are intentionally generic; details go to debug logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token has no `exp` claim.
    #[error("The access token is invalid or expired")]
    MissingExpiry,

    /// Token `exp` has passed.
    #[error("The access token is invalid or expired")]
    Expired,

    /// Token `nbf` is in the future.
    #[error("The access token is invalid or expired")]
    NotYetValid,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Registered claims read from a token payload without signature verification.
///
/// The `sub` field is redacted in Debug output.
#[derive(Clone, Default, Deserialize)]
pub struct UnverifiedClaims {
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,

    /// Subject.
    #[serde(default)]
    pub sub: Option<String>,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default)]
    pub iat: Option<i64>,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(default)]
    pub nbf: Option<i64>,

    /// Expiration timestamp (Unix epoch seconds).
    #[serde(default)]
    pub exp: Option<i64>,
}

impl fmt::Debug for UnverifiedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnverifiedClaims")
            .field("iss", &self.iss)
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("iat", &self.iat)
            .field("nbf", &self.nbf)
            .field("exp", &self.exp)
            .finish()
    }
}

impl UnverifiedClaims {
    /// The `iss` claim, if present and non-empty.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.iss.as_deref().filter(|s| !s.is_empty())
    }

    /// Seconds until `exp`, measured from `now`. `None` when there is no `exp`.
    #[must_use]
    pub fn seconds_until_expiry(&self, now: i64) -> Option<i64> {
        self.exp.map(|exp| exp - now)
    }

    /// Check `exp`, `nbf` and `iat` against `now`.
    ///
    /// `exp` is mandatory. `nbf` and `iat` are checked only when present; `iat`
    /// is allowed [`DEFAULT_CLOCK_SKEW`] into the future.
    ///
    /// # Errors
    ///
    /// Returns the first failing check as a `JwtValidationError`.
    pub fn validate_at(&self, now: i64) -> Result<(), JwtValidationError> {
        let exp = self.exp.ok_or(JwtValidationError::MissingExpiry)?;
        if exp <= now {
            return Err(JwtValidationError::Expired);
        }
        if let Some(nbf) = self.nbf {
            if nbf > now {
                return Err(JwtValidationError::NotYetValid);
            }
        }
        if let Some(iat) = self.iat {
            validate_iat_at(iat, DEFAULT_CLOCK_SKEW, now)?;
        }
        Ok(())
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Split a token into its three segments after checking its size.
fn segments(token: &str) -> Result<(&str, &str, &str), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => {
            tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
            Err(JwtValidationError::MalformedToken)
        }
    }
}

fn decode_segment(segment: &str, what: &'static str) -> Result<Vec<u8>, JwtValidationError> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, segment = what, "Failed to decode JWT base64");
            JwtValidationError::MalformedToken
        })
}

/// Decode the payload of a JWT into [`UnverifiedClaims`].
///
/// The signature is NOT checked.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Wrong structure, bad base64, or a payload that is not a
///   JSON object with well-typed registered claims
pub fn decode_unverified(token: &str) -> Result<UnverifiedClaims, JwtValidationError> {
    let (_, payload_part, _) = segments(token)?;
    let payload_bytes = decode_segment(payload_part, "payload")?;

    serde_json::from_slice(&payload_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT payload JSON");
        JwtValidationError::MalformedToken
    })
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Whether `token` decodes, passes the standard time checks, and stays valid for
/// longer than [`EXPIRY_SAFETY_MARGIN`].
///
/// Only suitable for tokens this process obtained from a trusted endpoint.
#[must_use]
pub fn is_valid_token(token: &str) -> bool {
    is_valid_token_at(token, chrono::Utc::now().timestamp())
}

/// Deterministic variant of [`is_valid_token`] for boundary tests.
#[must_use]
pub fn is_valid_token_at(token: &str, now: i64) -> bool {
    let Ok(claims) = decode_unverified(token) else {
        return false;
    };
    if claims.validate_at(now).is_err() {
        return false;
    }

    #[allow(clippy::cast_possible_wrap)]
    let margin = EXPIRY_SAFETY_MARGIN.as_secs() as i64;
    claims
        .seconds_until_expiry(now)
        .is_some_and(|remaining| remaining > margin)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn token_with_payload(payload: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload);
        format!("{header}.{body}.c2lnbmF0dXJl")
    }

    fn token_expiring_at(exp: i64) -> String {
        token_with_payload(&format!(r#"{{"iss":"registry","iat":{},"exp":{exp}}}"#, NOW - 60))
    }

    #[test]
    fn test_max_jwt_size_is_8kb() {
        assert_eq!(MAX_JWT_SIZE_BYTES, 8192);
    }

    #[test]
    fn test_oversized_token_rejected_before_decoding() {
        let oversized = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            decode_unverified(&oversized).unwrap_err(),
            JwtValidationError::TokenTooLarge
        );
    }

    #[test]
    fn test_decode_unverified_reads_registered_claims() {
        let token = token_with_payload(
            r#"{"iss":"https://dex.example","sub":"alice","iat":10,"nbf":11,"exp":12,"email":"a@b"}"#,
        );
        let claims = decode_unverified(&token).unwrap();
        assert_eq!(claims.issuer(), Some("https://dex.example"));
        assert_eq!(claims.sub.as_deref(), Some("alice"));
        assert_eq!(claims.iat, Some(10));
        assert_eq!(claims.nbf, Some(11));
        assert_eq!(claims.exp, Some(12));
    }

    #[test]
    fn test_decode_unverified_tolerates_padding() {
        let header = URL_SAFE_NO_PAD.encode("{}");
        let token = format!("{header}.eyJpc3MiOiJ4In0=.sig");
        assert_eq!(decode_unverified(&token).unwrap().issuer(), Some("x"));
    }

    #[test]
    fn test_decode_unverified_rejects_non_object_payload() {
        let token = token_with_payload("[1,2,3]");
        assert_eq!(
            decode_unverified(&token).unwrap_err(),
            JwtValidationError::MalformedToken
        );
    }

    #[test]
    fn test_decode_unverified_rejects_wrong_structure() {
        for token in ["", "a.b", "a.b.c.d", "e30.!!!.sig"] {
            assert_eq!(
                decode_unverified(token).unwrap_err(),
                JwtValidationError::MalformedToken,
                "{token:?}"
            );
        }
    }

    #[test]
    fn test_empty_issuer_is_none() {
        let token = token_with_payload(r#"{"iss":""}"#);
        assert_eq!(decode_unverified(&token).unwrap().issuer(), None);
    }

    #[test]
    fn test_debug_redacts_subject() {
        let claims = UnverifiedClaims {
            sub: Some("system:serviceaccount:ns:builder".to_string()),
            ..Default::default()
        };
        let debug_str = format!("{claims:?}");
        assert!(!debug_str.contains("builder"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_validate_iat_boundary() {
        assert!(validate_iat_at(NOW + 300, DEFAULT_CLOCK_SKEW, NOW).is_ok());
        assert_eq!(
            validate_iat_at(NOW + 301, DEFAULT_CLOCK_SKEW, NOW),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_validate_iat_uses_wall_clock() {
        let past = chrono::Utc::now().timestamp() - 3600;
        assert!(validate_iat(past, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_validate_at_checks_nbf_and_exp() {
        let claims = UnverifiedClaims {
            nbf: Some(NOW + 10),
            exp: Some(NOW + 3600),
            ..Default::default()
        };
        assert_eq!(claims.validate_at(NOW), Err(JwtValidationError::NotYetValid));

        let claims = UnverifiedClaims {
            exp: Some(NOW),
            ..Default::default()
        };
        assert_eq!(claims.validate_at(NOW), Err(JwtValidationError::Expired));

        let claims = UnverifiedClaims::default();
        assert_eq!(claims.validate_at(NOW), Err(JwtValidationError::MissingExpiry));
    }

    #[test]
    fn test_token_expiring_in_an_hour_is_valid() {
        assert!(is_valid_token_at(&token_expiring_at(NOW + 3600), NOW));
    }

    #[test]
    fn test_expired_token_is_invalid() {
        assert!(!is_valid_token_at(&token_expiring_at(NOW - 3600), NOW));
    }

    #[test]
    fn test_token_inside_safety_margin_is_invalid() {
        assert!(!is_valid_token_at(&token_expiring_at(NOW + 20), NOW));
        assert!(!is_valid_token_at(&token_expiring_at(NOW + 30), NOW));
        assert!(is_valid_token_at(&token_expiring_at(NOW + 31), NOW));
    }

    #[test]
    fn test_token_issued_in_the_future_is_invalid() {
        let token = token_with_payload(&format!(
            r#"{{"iat":{},"exp":{}}}"#,
            NOW + 86_400,
            NOW + 90_000
        ));
        assert!(!is_valid_token_at(&token, NOW));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(!is_valid_token_at("123", NOW));
        assert!(!is_valid_token("123"));
    }
}
