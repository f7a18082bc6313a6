use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, trace, warn};
use tunnel_core::cache::Result;
use tunnel_core::{CacheError, MappingSnapshot, ShortCode, SnapshotCache};

const DEFAULT_KEY_PREFIX: &str = "tunnel:snap:";

/// A Redis-based implementation of [`SnapshotCache`].
///
/// Snapshots are stored as JSON strings with a millisecond TTL (`PSETEX`),
/// so Redis itself enforces the staleness bound.
#[derive(Debug, Clone)]
pub struct RedisSnapshotCache {
    conn: redis::aio::MultiplexedConnection,
    key_prefix: String,
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> CacheError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() || message.to_ascii_lowercase().contains("timed out") {
        CacheError::Timeout(message)
    } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        CacheError::Unavailable(message)
    } else {
        CacheError::Operation(message)
    }
}

impl RedisSnapshotCache {
    /// Creates a new Redis snapshot cache using the `tunnel:snap:` key prefix.
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self::with_prefix(conn, DEFAULT_KEY_PREFIX)
    }

    /// Creates a new Redis snapshot cache with a custom key prefix.
    pub fn with_prefix(
        conn: redis::aio::MultiplexedConnection,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    fn cache_key(&self, code: &ShortCode) -> String {
        format!("{}{}", self.key_prefix, code.as_str())
    }
}

#[async_trait]
impl SnapshotCache for RedisSnapshotCache {
    async fn get_with_ttl(&self, code: &ShortCode) -> Result<Option<(MappingSnapshot, Duration)>> {
        let key = self.cache_key(code);
        trace!(code = %code, "Fetching snapshot from Redis cache");

        let mut conn = self.conn.clone();
        let (cached, pttl): (Option<String>, i64) = redis::pipe()
            .atomic()
            .get(&key)
            .pttl(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(code = %code, error = %e, "Redis error on get");
                map_redis_error("failed to fetch value from Redis", e)
            })?;

        let Some(cached) = cached else {
            trace!(code = %code, "Cache miss in Redis");
            return Ok(None);
        };

        let snapshot = serde_json::from_str::<MappingSnapshot>(&cached).map_err(|e| {
            warn!(code = %code, error = %e, "Failed to deserialize cached snapshot");
            CacheError::InvalidData(format!("invalid cached value for key '{key}': {e}"))
        })?;

        // every key is written with PSETEX, a negative PTTL only shows up if
        // the key vanished between the two commands or was written externally
        let remaining = u64::try_from(pttl)
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);

        debug!(code = %code, "Cache hit in Redis");
        Ok(Some((snapshot, remaining)))
    }

    async fn set(
        &self,
        code: &ShortCode,
        snapshot: &MappingSnapshot,
        ttl: Duration,
    ) -> Result<()> {
        let key = self.cache_key(code);
        trace!(code = %code, ttl_ms = ttl.as_millis() as u64, "Storing snapshot in Redis cache");

        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            // PSETEX rejects a zero TTL; an entry that may not live is no entry
            return self.del(code).await;
        }

        let json = serde_json::to_string(snapshot).map_err(|e| {
            warn!(code = %code, error = %e, "Failed to serialize snapshot for caching");
            CacheError::Serialization(format!("failed to serialize cache value: {e}"))
        })?;

        let mut conn = self.conn.clone();
        match conn.pset_ex::<_, _, ()>(&key, json, millis).await {
            Ok(()) => {
                debug!(code = %code, "Cached snapshot in Redis");
                Ok(())
            }
            Err(e) => {
                warn!(code = %code, error = %e, "Failed to cache snapshot in Redis");
                Err(map_redis_error("failed to write value to Redis", e))
            }
        }
    }

    async fn del(&self, code: &ShortCode) -> Result<()> {
        let key = self.cache_key(code);
        trace!(code = %code, "Removing snapshot from Redis cache");

        let mut conn = self.conn.clone();
        match conn.del::<_, ()>(&key).await {
            Ok(()) => {
                debug!(code = %code, "Removed snapshot from Redis cache");
                Ok(())
            }
            Err(e) => {
                warn!(code = %code, error = %e, "Failed to remove snapshot from Redis cache");
                Err(map_redis_error("failed to delete value from Redis", e))
            }
        }
    }
}
