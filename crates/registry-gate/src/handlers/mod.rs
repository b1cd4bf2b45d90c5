//! HTTP request handlers for the registry gate.

pub mod metrics;
pub mod oauth;
pub mod ping;
pub mod registry;
pub mod token;

pub use metrics::metrics_handler;
pub use oauth::{oauth_callback, oauth_login};
pub use ping::ping;
pub use registry::forward_registry_request;
pub use token::issue_token;
