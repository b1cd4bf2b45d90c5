//! Read-access decision for image repositories.
//!
//! An identity may pull from a namespace if the cluster grants it any
//! read-equivalent verb on `imagerepositories` there. Verbs are tried in a
//! fixed order and the first grant ends the scan.

use crate::auth::identity::Identity;
use crate::cluster::models::ResourceAttributes;
use crate::cluster::AccessReviewer;
use crate::observability::metrics;
use std::sync::Arc;
use tracing::instrument;

/// Verbs that imply read access, in evaluation order.
pub const READ_VERBS: [&str; 3] = ["get", "list", "watch"];

pub const RESOURCE_GROUP: &str = "appstudio.redhat.com";
pub const RESOURCE_VERSION: &str = "v1alpha1";
pub const RESOURCE: &str = "imagerepositories";

/// Decides read access through the cluster's access-review authority.
#[derive(Clone)]
pub struct AccessPolicy {
    reviewer: Arc<dyn AccessReviewer>,
}

impl AccessPolicy {
    pub fn new(reviewer: Arc<dyn AccessReviewer>) -> Self {
        Self { reviewer }
    }

    /// Whether `identity` may read image repositories in `namespace`.
    ///
    /// A failed review counts as a denial for that verb and the scan moves on.
    #[instrument(skip_all, name = "gate.authz.is_allowed", fields(namespace = %namespace))]
    pub async fn is_allowed(&self, identity: &Identity, namespace: &str) -> bool {
        for verb in READ_VERBS {
            let attributes = ResourceAttributes {
                group: RESOURCE_GROUP.to_string(),
                version: RESOURCE_VERSION.to_string(),
                resource: RESOURCE.to_string(),
                namespace: namespace.to_string(),
                verb: verb.to_string(),
            };

            match self
                .reviewer
                .review_access(identity.username(), identity.groups(), &attributes)
                .await
            {
                Ok(true) => {
                    metrics::record_access_review(verb, "allowed");
                    metrics::record_authorization_decision(true);
                    tracing::debug!(target: "gate.authz", verb = verb, "Read access granted");
                    return true;
                }
                Ok(false) => {
                    metrics::record_access_review(verb, "denied");
                }
                Err(e) => {
                    metrics::record_access_review(verb, "error");
                    tracing::error!(target: "gate.authz", verb = verb, error = %e, "Access review failed");
                }
            }
        }

        metrics::record_authorization_decision(false);
        tracing::info!(target: "gate.authz", "Read access denied for every verb");
        false
    }
}
