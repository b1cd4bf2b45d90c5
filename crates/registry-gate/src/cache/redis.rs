//! Redis-backed credential cache.
//!
//! # Sharding
//!
//! Keys are spread over the configured endpoints by a stable hash of the key,
//! so every gate replica with the same endpoint list picks the same shard.
//!
//! # Connections
//!
//! Each shard holds a `ConnectionManager`, created on first use and then
//! shared. The manager reconnects on its own after a dropped connection.
//! Connecting and every command are bounded by timeouts, so a shard that
//! accepts connections but never answers fails the lookup instead of
//! holding the request.
//!
//! Endpoint URLs may carry passwords and are never logged.

use super::{CacheError, CredentialCache};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Prefix applied to every key the gate writes.
pub const KEY_PREFIX: &str = "registry-gate:credential:";

// A down shard costs each request one short retry, not a long backoff.
const CONNECT_RETRIES: usize = 1;
const CONNECT_BACKOFF_BASE: u64 = 2;
const CONNECT_BACKOFF_FACTOR_MS: u64 = 50;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_number_of_retries(CONNECT_RETRIES)
        .set_exponent_base(CONNECT_BACKOFF_BASE)
        .set_factor(CONNECT_BACKOFF_FACTOR_MS)
        .set_connection_timeout(CONNECT_TIMEOUT)
        .set_response_timeout(RESPONSE_TIMEOUT)
}

struct Shard {
    client: Client,
    connection: OnceCell<ConnectionManager>,
}

impl Shard {
    async fn connection(&self, index: usize) -> Result<ConnectionManager, CacheError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                ConnectionManager::new_with_config(self.client.clone(), manager_config())
                    .await
                    .map_err(|e| {
                        tracing::warn!(target: "gate.cache.redis", shard = index, error = %e, "Failed to connect to cache shard");
                        CacheError::Connection(e.to_string())
                    })
            })
            .await?;
        Ok(connection.clone())
    }
}

/// Credential cache spread over one or more Redis servers.
pub struct RedisCache {
    shards: Vec<Shard>,
}

impl RedisCache {
    /// Build a cache over `endpoints`. No connection is opened here.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InvalidEndpoint` if the list is empty or an
    /// endpoint is not a valid Redis URL.
    pub fn new(endpoints: &[String]) -> Result<Self, CacheError> {
        if endpoints.is_empty() {
            return Err(CacheError::InvalidEndpoint(
                "no cache endpoints configured".to_string(),
            ));
        }

        let shards = endpoints
            .iter()
            .enumerate()
            .map(|(index, endpoint)| {
                Client::open(endpoint.as_str())
                    .map(|client| Shard {
                        client,
                        connection: OnceCell::new(),
                    })
                    .map_err(|e| {
                        CacheError::InvalidEndpoint(format!("endpoint {index}: {e}"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { shards })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, key: &str) -> Result<(usize, &Shard), CacheError> {
        let index = shard_index(key, self.shards.len());
        self.shards
            .get(index)
            .map(|shard| (index, shard))
            .ok_or_else(|| CacheError::InvalidEndpoint(format!("no shard at index {index}")))
    }
}

fn shard_index(key: &str, shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    // Modulo keeps the value below shard_count, which fits in usize.
    #[allow(clippy::cast_possible_truncation)]
    let index = (hasher.finish() % shard_count as u64) as usize;
    index
}

fn prefixed(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}

#[async_trait]
impl CredentialCache for RedisCache {
    #[instrument(skip_all, name = "gate.cache.get")]
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let (index, shard) = self.shard_for(key)?;
        let mut conn = shard.connection(index).await?;

        conn.get(prefixed(key)).await.map_err(|e| {
            tracing::warn!(target: "gate.cache.redis", shard = index, error = %e, "Cache read failed");
            CacheError::Command(e.to_string())
        })
    }

    #[instrument(skip_all, name = "gate.cache.set")]
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let seconds = ttl.as_secs();
        if seconds == 0 {
            return Ok(());
        }

        let (index, shard) = self.shard_for(key)?;
        let mut conn = shard.connection(index).await?;

        conn.set_ex::<_, _, ()>(prefixed(key), value, seconds)
            .await
            .map_err(|e| {
                tracing::warn!(target: "gate.cache.redis", shard = index, error = %e, "Cache write failed");
                CacheError::Command(e.to_string())
            })
    }
}
