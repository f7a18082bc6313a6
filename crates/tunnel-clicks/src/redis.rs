use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use tracing::{trace, warn};
use tunnel_core::clicks::Result;
use tunnel_core::{ClickCounter, ClickError, MappingId};

const DEFAULT_KEY_PREFIX: &str = "tunnel:clicks:";

/// Reads the pending count and subtracts exactly that amount.
const TAKE_SCRIPT: &str = r"
local observed = tonumber(redis.call('HGET', KEYS[1], ARGV[1]) or '0')
if observed > 0 then
  redis.call('HINCRBY', KEYS[1], ARGV[1], -observed)
end
return observed
";

/// Drops the counter and its membership only while the count is zero.
const RETIRE_SCRIPT: &str = r"
local count = tonumber(redis.call('HGET', KEYS[1], ARGV[1]) or '0')
if count ~= 0 then
  return 0
end
redis.call('HDEL', KEYS[1], ARGV[1])
return redis.call('SREM', KEYS[2], ARGV[1])
";

/// Click counters shared through Redis.
///
/// Pending counts live in the hash `<prefix>pending` and membership in the
/// set `<prefix>members`. Multi-key updates run as `MULTI` pipelines and the
/// conditional ones as Lua scripts, so every operation is atomic on the
/// server and several flusher processes may share the same counters.
#[derive(Debug, Clone)]
pub struct RedisClickCounter {
    conn: redis::aio::MultiplexedConnection,
    pending_key: String,
    members_key: String,
    take_script: Script,
    retire_script: Script,
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> ClickError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() || message.to_ascii_lowercase().contains("timed out") {
        ClickError::Timeout(message)
    } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        ClickError::Unavailable(message)
    } else {
        ClickError::Operation(message)
    }
}

impl RedisClickCounter {
    /// Creates a counter using the `tunnel:clicks:` key prefix.
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self::with_prefix(conn, DEFAULT_KEY_PREFIX)
    }

    pub fn with_prefix(conn: redis::aio::MultiplexedConnection, key_prefix: impl Into<String>) -> Self {
        let key_prefix = key_prefix.into();
        Self {
            conn,
            pending_key: format!("{key_prefix}pending"),
            members_key: format!("{key_prefix}members"),
            take_script: Script::new(TAKE_SCRIPT),
            retire_script: Script::new(RETIRE_SCRIPT),
        }
    }

    async fn add(&self, id: MappingId, delta: u64) -> Result<u64> {
        let delta = i64::try_from(delta)
            .map_err(|_| ClickError::InvalidData(format!("delta {delta} exceeds i64")))?;

        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .hincr(&self.pending_key, id.get(), delta)
            .sadd(&self.members_key, id.get())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(mapping_id = %id, error = %e, "Failed to add clicks in Redis");
                map_redis_error("failed to add clicks", e)
            })?;

        non_negative(id, count)
    }
}

fn non_negative(id: MappingId, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        ClickError::InvalidData(format!("negative pending count {value} for mapping {id}"))
    })
}

#[async_trait]
impl ClickCounter for RedisClickCounter {
    async fn increment(&self, id: MappingId) -> Result<u64> {
        trace!(mapping_id = %id, "Incrementing click counter in Redis");
        self.add(id, 1).await
    }

    async fn pending_ids(&self) -> Result<Vec<MappingId>> {
        let mut conn = self.conn.clone();
        let ids: Vec<u64> = conn
            .smembers(&self.members_key)
            .await
            .map_err(|e| map_redis_error("failed to list pending mappings", e))?;
        Ok(ids.into_iter().map(MappingId::new).collect())
    }

    async fn pending(&self, id: MappingId) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn
            .hget(&self.pending_key, id.get())
            .await
            .map_err(|e| map_redis_error("failed to read pending count", e))?;
        non_negative(id, count.unwrap_or(0))
    }

    async fn take(&self, id: MappingId) -> Result<u64> {
        let mut conn = self.conn.clone();
        let observed: i64 = self
            .take_script
            .key(&self.pending_key)
            .arg(id.get())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(mapping_id = %id, error = %e, "Failed to take pending clicks");
                map_redis_error("failed to take pending clicks", e)
            })?;

        trace!(mapping_id = %id, observed, "Took pending clicks from Redis");
        non_negative(id, observed)
    }

    async fn restore(&self, id: MappingId, delta: u64) -> Result<()> {
        trace!(mapping_id = %id, delta, "Restoring clicks in Redis");
        self.add(id, delta).await.map(|_| ())
    }

    async fn retire_if_idle(&self, id: MappingId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .retire_script
            .key(&self.pending_key)
            .key(&self.members_key)
            .arg(id.get())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to retire mapping", e))?;
        Ok(removed == 1)
    }
}
