//! Bearer token to identity resolution.
//!
//! The token's issuer is read without verification and used only to choose a
//! trust source. Whatever the source, the identity returned comes from a
//! verifier that checked the token. All failures degrade to `None`.

use crate::auth::identity::Identity;
use crate::auth::oidc::IdTokenVerifier;
use crate::cluster::TokenReviewer;
use crate::observability::metrics;
use common::jwt::decode_unverified;
use std::sync::Arc;
use tracing::instrument;

/// Which authority verified (or failed to verify) a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustSource {
    IdentityProvider,
    TokenReview,
}

impl TrustSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TrustSource::IdentityProvider => "identity_provider",
            TrustSource::TokenReview => "token_review",
        }
    }
}

/// Routes bearer tokens to the matching verifier.
#[derive(Clone)]
pub struct IdentityResolver {
    oidc_issuer: Option<String>,
    id_tokens: Option<Arc<dyn IdTokenVerifier>>,
    token_reviews: Arc<dyn TokenReviewer>,
}

impl IdentityResolver {
    /// Create a resolver.
    ///
    /// `oidc` pairs the configured issuer with its verifier; without it every
    /// token goes to token review.
    pub fn new(
        oidc: Option<(String, Arc<dyn IdTokenVerifier>)>,
        token_reviews: Arc<dyn TokenReviewer>,
    ) -> Self {
        let (oidc_issuer, id_tokens) = match oidc {
            Some((issuer, verifier)) => (Some(issuer), Some(verifier)),
            None => (None, None),
        };
        Self {
            oidc_issuer,
            id_tokens,
            token_reviews,
        }
    }

    /// Trust source for a token, or `None` if it does not decode.
    pub fn classify(&self, token: &str) -> Option<TrustSource> {
        let claims = match decode_unverified(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(target: "gate.auth.resolver", error = ?e, "Bearer token does not decode");
                return None;
            }
        };

        match (&self.oidc_issuer, claims.issuer()) {
            (Some(configured), Some(issuer)) if configured == issuer => {
                Some(TrustSource::IdentityProvider)
            }
            _ => Some(TrustSource::TokenReview),
        }
    }

    /// Resolve a bearer token to a verified identity.
    #[instrument(skip_all, name = "gate.auth.resolve")]
    pub async fn resolve(&self, token: &str) -> Option<Identity> {
        let source = self.classify(token)?;

        let identity = match source {
            TrustSource::IdentityProvider => self.verify_id_token(token).await,
            TrustSource::TokenReview => self.review_token(token).await,
        };

        metrics::record_identity_resolution(
            source.as_str(),
            if identity.is_some() { "verified" } else { "rejected" },
        );
        identity
    }

    async fn verify_id_token(&self, token: &str) -> Option<Identity> {
        let verifier = self.id_tokens.as_ref()?;
        match verifier.verify(token).await {
            Ok(identity) => {
                tracing::debug!(target: "gate.auth.resolver", groups = identity.groups().len(), "ID token verified");
                Some(identity)
            }
            Err(e) => {
                tracing::warn!(target: "gate.auth.resolver", error = %e, "ID token verification failed");
                None
            }
        }
    }

    async fn review_token(&self, token: &str) -> Option<Identity> {
        let status = match self.token_reviews.review_token(token).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(target: "gate.auth.resolver", error = %e, "Token review failed");
                return None;
            }
        };

        match status.authenticated_username() {
            Some(username) => Identity::new(username, Vec::new()),
            None => {
                if let Some(error) = status.error.as_deref().filter(|e| !e.is_empty()) {
                    tracing::info!(target: "gate.auth.resolver", error = %error, "Token is not authenticated");
                }
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::oidc::mock::MockIdTokenVerifier;
    use crate::cluster::mock::MockTokenReviewer;
    use crate::cluster::models::{TokenReviewStatus, UserInfo};
    use gate_test_utils::token_builders::unsigned_token;

    const ISSUER: &str = "https://dex.example.com";

    fn alice() -> Identity {
        Identity::new("alice@example.com", vec!["devs".to_string()]).unwrap()
    }

    fn resolver(
        idp: Arc<MockIdTokenVerifier>,
        reviews: Arc<MockTokenReviewer>,
    ) -> IdentityResolver {
        let idp: Arc<dyn IdTokenVerifier> = idp;
        IdentityResolver::new(Some((ISSUER.to_string(), idp)), reviews)
    }

    #[tokio::test]
    async fn test_idp_issued_token_never_reaches_token_review() {
        let idp = Arc::new(MockIdTokenVerifier::accepting(alice()));
        let reviews = Arc::new(MockTokenReviewer::authenticating("someone-else"));
        let resolver = resolver(idp.clone(), reviews.clone());

        let token = unsigned_token(&serde_json::json!({"iss": ISSUER, "exp": 4_000_000_000_i64}));
        let identity = resolver.resolve(&token).await.unwrap();

        assert_eq!(identity, alice());
        assert_eq!(idp.call_count(), 1);
        assert_eq!(reviews.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_idp_token_does_not_fall_back() {
        let idp = Arc::new(MockIdTokenVerifier::rejecting());
        let reviews = Arc::new(MockTokenReviewer::authenticating("someone-else"));
        let resolver = resolver(idp.clone(), reviews.clone());

        let token = unsigned_token(&serde_json::json!({"iss": ISSUER}));
        assert!(resolver.resolve(&token).await.is_none());
        assert_eq!(reviews.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_issuer_goes_to_token_review() {
        let idp = Arc::new(MockIdTokenVerifier::accepting(alice()));
        let reviews = Arc::new(MockTokenReviewer::authenticating(
            "system:serviceaccount:dev:builder",
        ));
        let resolver = resolver(idp.clone(), reviews.clone());

        let token = unsigned_token(&serde_json::json!({"iss": "https://kubernetes.default.svc"}));
        let identity = resolver.resolve(&token).await.unwrap();

        assert_eq!(identity.username(), "system:serviceaccount:dev:builder");
        assert!(identity.groups().is_empty());
        assert_eq!(idp.call_count(), 0);
        assert_eq!(reviews.call_count(), 1);
    }

    #[tokio::test]
    async fn test_without_idp_everything_goes_to_token_review() {
        let reviews = Arc::new(MockTokenReviewer::authenticating("sa"));
        let resolver = IdentityResolver::new(None, reviews.clone());

        let token = unsigned_token(&serde_json::json!({"iss": ISSUER}));
        assert_eq!(resolver.classify(&token), Some(TrustSource::TokenReview));
        assert!(resolver.resolve(&token).await.is_some());
        assert_eq!(reviews.call_count(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_token_is_rejected_without_calls() {
        let idp = Arc::new(MockIdTokenVerifier::accepting(alice()));
        let reviews = Arc::new(MockTokenReviewer::authenticating("sa"));
        let resolver = resolver(idp.clone(), reviews.clone());

        assert!(resolver.resolve("opaque-token").await.is_none());
        assert_eq!(idp.call_count(), 0);
        assert_eq!(reviews.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_review_is_rejected() {
        let reviews = Arc::new(MockTokenReviewer::with_status(TokenReviewStatus {
            authenticated: false,
            user: Some(UserInfo::default()),
            error: Some("token has expired".to_string()),
        }));
        let resolver = IdentityResolver::new(None, reviews);

        let token = unsigned_token(&serde_json::json!({"iss": "k8s"}));
        assert!(resolver.resolve(&token).await.is_none());
    }

    #[tokio::test]
    async fn test_review_failure_is_rejected() {
        let resolver = IdentityResolver::new(None, Arc::new(MockTokenReviewer::failing()));
        let token = unsigned_token(&serde_json::json!({"iss": "k8s"}));
        assert!(resolver.resolve(&token).await.is_none());
    }
}
