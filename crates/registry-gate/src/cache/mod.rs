//! Key/value cache for upstream credentials.
//!
//! Values are opaque strings with a per-entry TTL. Every cache failure is
//! recoverable: callers treat a failed read as a miss and a failed write as a
//! no-op.

pub mod redis;

pub use self::redis::RedisCache;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),

    #[error("cache command failed: {0}")]
    Command(String),

    #[error("invalid cache endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Shared credential store.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Look up a value. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value that expires after `ttl`. Last write wins.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// In-process cache doubles for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    /// HashMap-backed cache honouring TTLs.
    #[derive(Default)]
    pub struct InMemoryCache {
        entries: Mutex<HashMap<String, (String, Instant)>>,
        gets: AtomicUsize,
        sets: AtomicUsize,
    }

    impl InMemoryCache {
        pub fn new() -> Self {
            Self::default()
        }

        /// Drop every entry, as if all TTLs had elapsed.
        pub fn expire_all(&self) {
            if let Ok(mut entries) = self.entries.lock() {
                entries.clear();
            }
        }

        pub fn get_count(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        pub fn set_count(&self) -> usize {
            self.sets.load(Ordering::SeqCst)
        }

        /// Remaining lifetime of an entry, if present.
        pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
            let entries = self.entries.lock().ok()?;
            entries
                .get(key)
                .map(|(_, expires_at)| expires_at.saturating_duration_since(Instant::now()))
        }
    }

    #[async_trait]
    impl CredentialCache for InMemoryCache {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let entries = self
                .entries
                .lock()
                .map_err(|e| CacheError::Command(e.to_string()))?;
            Ok(entries
                .get(key)
                .filter(|(_, expires_at)| *expires_at > Instant::now())
                .map(|(value, _)| value.clone()))
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            let mut entries = self
                .entries
                .lock()
                .map_err(|e| CacheError::Command(e.to_string()))?;
            entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
            Ok(())
        }
    }

    /// Cache whose every call fails.
    #[derive(Default)]
    pub struct FailingCache {
        calls: AtomicUsize,
    }

    impl FailingCache {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialCache for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Connection("cache unreachable".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Connection("cache unreachable".to_string()))
        }
    }
}
