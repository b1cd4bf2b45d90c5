//! Registry Gate Library
//!
//! An authenticating, authorizing reverse proxy in front of a container image
//! registry. Clients present a bearer token; the gate works out who they are,
//! asks the cluster whether they may read image repositories in the target
//! namespace, and only then forwards the request with the gate's own
//! short-lived, repository-scoped backend credential.
//!
//! # Architecture
//!
//! ```text
//! routes -> middleware/authz -> auth (resolver) -> authz (policy)
//!                            -> handlers/registry -> backend (token_auth, proxy)
//! ```
//!
//! # Modules
//!
//! - `auth` - Bearer token to identity resolution (OIDC and token review)
//! - `authz` - Read-access decisions via access reviews
//! - `backend` - Upstream credential broker and streaming proxy
//! - `cache` - Credential cache contract and Redis implementation
//! - `cluster` - Cluster review API client
//! - `config` - Service configuration from environment
//! - `errors` - Error types rendered as Distribution API errors
//! - `handlers` - HTTP request handlers
//! - `middleware` - Authorization and metrics middleware
//! - `observability` - Metrics
//! - `repository` - Repository path parsing
//! - `routes` - Axum router setup

pub mod auth;
pub mod authz;
pub mod backend;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod repository;
pub mod routes;
