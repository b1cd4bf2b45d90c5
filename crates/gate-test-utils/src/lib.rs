//! # Gate Test Utilities
//!
//! Shared test utilities for the registry gate.
//!
//! This crate provides:
//! - Deterministic Ed25519 signing keys published as JWKs
//! - Token builders (ID tokens, unsigned cluster tokens, backend tokens)
//! - Server test harness (TestGateServer for end-to-end tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gate_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let key = TestSigningKey::new(1, "idp-key-1");
//!     let token = IdTokenBuilder::new("https://dex.example.com", "registry-gate")
//!         .email("alice@example.com")
//!         .sign(&key);
//!
//!     let server = TestGateServer::spawn(config).await?;
//!     // ... drive server.url() with reqwest ...
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
