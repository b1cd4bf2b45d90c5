//! Cluster API client for token and access reviews.
//!
//! The gate delegates two decisions to the cluster: whether a service-account
//! token is live (`TokenReview`) and whether an identity may perform a verb on
//! a namespaced resource (`SubjectAccessReview`). Both are plain REST calls
//! made with the gate's own bearer token.

pub mod models;

use crate::config::Config;
use models::{
    ResourceAttributes, SubjectAccessReview, SubjectAccessReviewResponse, TokenReview,
    TokenReviewResponse, TokenReviewStatus,
};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, warn};

const TOKEN_REVIEW_PATH: &str = "/apis/authentication.k8s.io/v1/tokenreviews";
const ACCESS_REVIEW_PATH: &str = "/apis/authorization.k8s.io/v1/subjectaccessreviews";

/// Connect timeout for cluster API calls.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Errors from cluster review calls.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster API request failed: {0}")]
    Transport(String),

    #[error("cluster API returned status {0}")]
    Status(u16),

    #[error("cluster API response could not be decoded: {0}")]
    Decode(String),

    #[error("cluster client could not be built: {0}")]
    Client(String),
}

/// Validates bearer tokens against the cluster's authentication authority.
#[async_trait::async_trait]
pub trait TokenReviewer: Send + Sync {
    async fn review_token(&self, token: &str) -> Result<TokenReviewStatus, ClusterError>;
}

/// Asks the cluster's authorization authority whether a subject may act.
#[async_trait::async_trait]
pub trait AccessReviewer: Send + Sync {
    async fn review_access(
        &self,
        user: &str,
        groups: &[String],
        attributes: &ResourceAttributes,
    ) -> Result<bool, ClusterError>;
}

/// HTTP client for the cluster review APIs.
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    base_url: Url,
    token: Option<SecretString>,
}

impl ClusterClient {
    /// Create a cluster client.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Client` if the HTTP client cannot be built.
    pub fn new(
        base_url: Url,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ClusterError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                tracing::error!(target: "gate.cluster", error = %e, "Failed to build HTTP client");
                ClusterError::Client(e.to_string())
            })?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ClusterError> {
        Self::new(
            config.cluster_url.clone(),
            config.cluster_token.clone(),
            config.upstream_timeout,
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn create<B, R>(&self, path: &str, body: &B) -> Result<R, ClusterError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(self.endpoint(path)).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "gate.cluster", error = %e, path = path, "Cluster API request failed");
            ClusterError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "gate.cluster", status = %status, path = path, "Cluster API returned error");
            return Err(ClusterError::Status(status.as_u16()));
        }

        response.json().await.map_err(|e| {
            warn!(target: "gate.cluster", error = %e, path = path, "Failed to parse cluster API response");
            ClusterError::Decode(e.to_string())
        })
    }
}

#[async_trait::async_trait]
impl TokenReviewer for ClusterClient {
    #[instrument(skip_all, name = "gate.cluster.token_review")]
    async fn review_token(&self, token: &str) -> Result<TokenReviewStatus, ClusterError> {
        let response: TokenReviewResponse =
            self.create(TOKEN_REVIEW_PATH, &TokenReview::new(token)).await?;
        Ok(response.status)
    }
}

#[async_trait::async_trait]
impl AccessReviewer for ClusterClient {
    #[instrument(skip_all, name = "gate.cluster.access_review", fields(verb = %attributes.verb, namespace = %attributes.namespace))]
    async fn review_access(
        &self,
        user: &str,
        groups: &[String],
        attributes: &ResourceAttributes,
    ) -> Result<bool, ClusterError> {
        let response: SubjectAccessReviewResponse = self
            .create(
                ACCESS_REVIEW_PATH,
                &SubjectAccessReview::new(user, groups, attributes),
            )
            .await?;

        if let Some(error) = response.status.evaluation_error.as_deref() {
            tracing::debug!(target: "gate.cluster", error = %error, "Access review reported evaluation error");
        }
        Ok(response.status.allowed && !response.status.denied)
    }
}

pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock token reviewer for unit testing.
    pub struct MockTokenReviewer {
        status: Option<TokenReviewStatus>,
        call_count: AtomicUsize,
    }

    impl MockTokenReviewer {
        /// Create a mock that authenticates every token as `username`.
        pub fn authenticating(username: &str) -> Self {
            Self {
                status: Some(TokenReviewStatus {
                    authenticated: true,
                    user: Some(models::UserInfo {
                        username: username.to_string(),
                        groups: Vec::new(),
                    }),
                    error: None,
                }),
                call_count: AtomicUsize::new(0),
            }
        }

        /// Create a mock that returns a fixed review status.
        pub fn with_status(status: TokenReviewStatus) -> Self {
            Self {
                status: Some(status),
                call_count: AtomicUsize::new(0),
            }
        }

        /// Create a mock whose calls fail.
        pub fn failing() -> Self {
            Self {
                status: None,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl TokenReviewer for MockTokenReviewer {
        async fn review_token(&self, _token: &str) -> Result<TokenReviewStatus, ClusterError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.status
                .clone()
                .ok_or_else(|| ClusterError::Transport("mock failure".to_string()))
        }
    }

    /// Scripted outcome of one access review.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Review {
        Allow,
        Deny,
        Fail,
    }

    /// Mock access reviewer with per-verb outcomes. Unscripted verbs are denied.
    pub struct MockAccessReviewer {
        outcomes: HashMap<String, Review>,
        calls: Mutex<Vec<ResourceAttributes>>,
    }

    impl MockAccessReviewer {
        pub fn new(outcomes: &[(&str, Review)]) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(verb, review)| ((*verb).to_string(), *review))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Create a mock that allows every verb.
        pub fn allowing() -> Self {
            Self::new(&[("get", Review::Allow), ("list", Review::Allow), ("watch", Review::Allow)])
        }

        /// Create a mock that denies every verb.
        pub fn denying() -> Self {
            Self::new(&[])
        }

        /// Verbs reviewed so far, in call order.
        pub fn reviewed_verbs(&self) -> Vec<String> {
            self.calls
                .lock()
                .map(|calls| calls.iter().map(|a| a.verb.clone()).collect())
                .unwrap_or_default()
        }

        /// Attributes of every review so far, in call order.
        pub fn reviews(&self) -> Vec<ResourceAttributes> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl AccessReviewer for MockAccessReviewer {
        async fn review_access(
            &self,
            _user: &str,
            _groups: &[String],
            attributes: &ResourceAttributes,
        ) -> Result<bool, ClusterError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(attributes.clone());
            }
            match self.outcomes.get(&attributes.verb).copied().unwrap_or(Review::Deny) {
                Review::Allow => Ok(true),
                Review::Deny => Ok(false),
                Review::Fail => Err(ClusterError::Status(500)),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ClusterClient {
        ClusterClient::new(
            Url::parse(&server.uri()).unwrap(),
            Some(SecretString::from("gate-sa-token")),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn attributes(verb: &str) -> ResourceAttributes {
        ResourceAttributes {
            group: "appstudio.redhat.com".to_string(),
            version: "v1alpha1".to_string(),
            resource: "imagerepositories".to_string(),
            namespace: "dev".to_string(),
            verb: verb.to_string(),
        }
    }

    #[tokio::test]
    async fn test_token_review_posts_token_with_gate_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_REVIEW_PATH))
            .and(header("authorization", "Bearer gate-sa-token"))
            .and(body_partial_json(serde_json::json!({
                "kind": "TokenReview",
                "spec": {"token": "caller-token"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "kind": "TokenReview",
                "status": {"authenticated": true, "user": {"username": "system:serviceaccount:dev:builder"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let status = client(&server).review_token("caller-token").await.unwrap();
        assert_eq!(
            status.authenticated_username(),
            Some("system:serviceaccount:dev:builder")
        );
    }

    #[tokio::test]
    async fn test_token_review_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_REVIEW_PATH))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server).review_token("t").await,
            Err(ClusterError::Status(403))
        ));
    }

    #[tokio::test]
    async fn test_access_review_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ACCESS_REVIEW_PATH))
            .and(body_partial_json(serde_json::json!({
                "spec": {
                    "user": "alice@example.com",
                    "groups": ["devs"],
                    "resourceAttributes": {
                        "group": "appstudio.redhat.com",
                        "version": "v1alpha1",
                        "resource": "imagerepositories",
                        "namespace": "dev",
                        "verb": "list"
                    }
                }
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"status": {"allowed": true}})),
            )
            .mount(&server)
            .await;

        let allowed = client(&server)
            .review_access("alice@example.com", &["devs".to_string()], &attributes("list"))
            .await
            .unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn test_access_review_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ACCESS_REVIEW_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_string("not json"))
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server)
                .review_access("alice", &[], &attributes("get"))
                .await,
            Err(ClusterError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_transport_error() {
        let client = ClusterClient::new(
            Url::parse("http://127.0.0.1:1").unwrap(),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(matches!(
            client.review_token("t").await,
            Err(ClusterError::Transport(_))
        ));
    }
}
