//! Backend registry access: credential brokering and request forwarding.

pub mod challenge;
pub mod proxy;
pub mod token_auth;

pub use proxy::BackendProxy;
pub use token_auth::{CredentialError, TokenAuth, UpstreamAuth};
