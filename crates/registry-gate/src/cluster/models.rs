//! Wire types for the Kubernetes authentication and authorization review APIs.
//!
//! Only the fields the gate reads or writes are modelled; everything else in
//! the server response is ignored.

use serde::{Deserialize, Serialize};

pub const TOKEN_REVIEW_API_VERSION: &str = "authentication.k8s.io/v1";
pub const ACCESS_REVIEW_API_VERSION: &str = "authorization.k8s.io/v1";

/// `TokenReview` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenReview<'a> {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub spec: TokenReviewSpec<'a>,
}

#[derive(Debug, Serialize)]
pub struct TokenReviewSpec<'a> {
    pub token: &'a str,
}

impl<'a> TokenReview<'a> {
    pub fn new(token: &'a str) -> Self {
        Self {
            api_version: TOKEN_REVIEW_API_VERSION,
            kind: "TokenReview",
            spec: TokenReviewSpec { token },
        }
    }
}

/// `TokenReview` response, reduced to its status.
#[derive(Debug, Deserialize)]
pub struct TokenReviewResponse {
    #[serde(default)]
    pub status: TokenReviewStatus,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TokenReviewStatus {
    #[serde(default)]
    pub authenticated: bool,

    #[serde(default)]
    pub user: Option<UserInfo>,

    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub groups: Vec<String>,
}

impl TokenReviewStatus {
    /// Username of an authenticated review, `None` otherwise.
    ///
    /// A review that reports an error is treated as unauthenticated even if the
    /// `authenticated` flag is set.
    pub fn authenticated_username(&self) -> Option<&str> {
        if !self.authenticated || self.error.as_deref().is_some_and(|e| !e.is_empty()) {
            return None;
        }
        self.user
            .as_ref()
            .map(|u| u.username.as_str())
            .filter(|u| !u.is_empty())
    }
}

/// Resource a `SubjectAccessReview` asks about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceAttributes {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespace: String,
    pub verb: String,
}

/// `SubjectAccessReview` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAccessReview<'a> {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub spec: SubjectAccessReviewSpec<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAccessReviewSpec<'a> {
    pub user: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub groups: &'a [String],
    pub resource_attributes: &'a ResourceAttributes,
}

impl<'a> SubjectAccessReview<'a> {
    pub fn new(user: &'a str, groups: &'a [String], attributes: &'a ResourceAttributes) -> Self {
        Self {
            api_version: ACCESS_REVIEW_API_VERSION,
            kind: "SubjectAccessReview",
            spec: SubjectAccessReviewSpec {
                user,
                groups,
                resource_attributes: attributes,
            },
        }
    }
}

/// `SubjectAccessReview` response, reduced to its status.
#[derive(Debug, Deserialize)]
pub struct SubjectAccessReviewResponse {
    #[serde(default)]
    pub status: SubjectAccessReviewStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAccessReviewStatus {
    #[serde(default)]
    pub allowed: bool,

    #[serde(default)]
    pub denied: bool,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub evaluation_error: Option<String>,
}
