//! Common utilities shared across the registry-gate crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, unverified claims, validity checks)
pub mod jwt;
