//! Caller authentication.
//!
//! Bearer tokens come from one of two trust sources: interactive users carry an
//! OIDC ID token from the configured identity provider, workloads carry a
//! cluster service-account token. The resolver picks the source from the
//! token's unverified issuer and hands the token to the matching verifier.
//!
//! # Components
//!
//! - `identity` - Verified caller identity
//! - `jwks` - JWKS client for fetching and caching the provider's signing keys
//! - `oidc` - Provider discovery, ID token verification and the code exchange
//! - `resolver` - Trust-source routing and failure-to-denial degradation

pub mod identity;
pub mod jwks;
pub mod oidc;
pub mod resolver;

pub use identity::Identity;
pub use jwks::JwksClient;
pub use oidc::{IdTokenVerifier, OidcVerifier};
pub use resolver::IdentityResolver;
