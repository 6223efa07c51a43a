//! Shared sliding-window stores for the distributed limiter.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, info};

use crate::error::{GateError, Result};

/// Prefix of every per-client sorted set.
pub const KEY_PREFIX: &str = "rate_limit:";

/// Trim, count and conditionally record in one server-side step.
///
/// KEYS[1] sorted set, ARGV[1] now (epoch seconds), ARGV[2] window seconds,
/// ARGV[3] limit, ARGV[4] unique member. Returns the count before insertion.
const SLIDING_WINDOW_SCRIPT: &str = r"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
if count < tonumber(ARGV[3]) then
  redis.call('ZADD', KEYS[1], now, ARGV[4])
  redis.call('EXPIRE', KEYS[1], window)
end
return count
";

/// A store of per-client timestamp sets shared by every gate instance.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Drop entries scored at or before `now - window`, count the rest and,
    /// if the count is below `limit`, record `now`.
    ///
    /// Returns the count observed before any insertion.
    async fn record(&self, key: &str, now: f64, window: Duration, limit: u64) -> Result<u64>;

    /// Forget the window for `key`.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Forget every window.
    async fn remove_all(&self) -> Result<()>;
}

/// Sliding windows held in Redis sorted sets.
pub struct RedisWindowStore {
    connection: ConnectionManager,
    script: Script,
    timeout: Duration,
}

impl RedisWindowStore {
    /// Connect to `url`, bounding every round trip by `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(url)?;
        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| GateError::StoreTimeout(timeout))??;

        info!(timeout_ms = timeout.as_millis() as u64, "Connected to Redis window store");

        Ok(Self {
            connection,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            timeout,
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let value = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| GateError::StoreTimeout(self.timeout))??;
        Ok(value)
    }
}

fn redis_key(key: &str) -> String {
    format!("{}{}", KEY_PREFIX, key)
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn record(&self, key: &str, now: f64, window: Duration, limit: u64) -> Result<u64> {
        let mut connection = self.connection.clone();
        let member = format!("{}-{}", now, uuid::Uuid::new_v4());
        let mut invocation = self.script.key(redis_key(key));
        invocation
            .arg(now)
            .arg(window.as_secs())
            .arg(limit)
            .arg(member);

        let count: u64 = self.bounded(invocation.invoke_async(&mut connection)).await?;
        Ok(count)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = self
            .bounded(redis::cmd("DEL").arg(redis_key(key)).query_async(&mut connection))
            .await?;
        Ok(())
    }

    async fn remove_all(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        let pattern = format!("{}*", KEY_PREFIX);
        let keys: Vec<String> = self
            .bounded(redis::cmd("KEYS").arg(&pattern).query_async(&mut connection))
            .await?;

        if !keys.is_empty() {
            let _: () = self
                .bounded(redis::cmd("DEL").arg(&keys).query_async(&mut connection))
                .await?;
        }
        debug!(removed = keys.len(), "Removed sliding windows");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryWindowStore;
    use super::*;
    use crate::ratelimit::clock::{Clock, SystemClock};

    #[test]
    fn test_redis_key_is_prefixed() {
        assert_eq!(redis_key("pk_abc"), "rate_limit:pk_abc");
    }

    #[test]
    fn test_script_trims_before_counting() {
        let trim = SLIDING_WINDOW_SCRIPT.find("ZREMRANGEBYSCORE").unwrap();
        let count = SLIDING_WINDOW_SCRIPT.find("ZCARD").unwrap();
        let add = SLIDING_WINDOW_SCRIPT.find("ZADD").unwrap();
        assert!(trim < count && count < add);
    }

    #[tokio::test]
    async fn test_memory_store_trims_expired_entries() {
        let store = MemoryWindowStore::default();
        let window = Duration::from_secs(60);

        assert_eq!(store.record("k", 100.0, window, 2).await.unwrap(), 0);
        assert_eq!(store.record("k", 130.0, window, 2).await.unwrap(), 1);
        // full: counted but not recorded
        assert_eq!(store.record("k", 150.0, window, 2).await.unwrap(), 2);
        assert_eq!(store.len("k"), 2);

        // the entry at 100 falls out exactly at the boundary
        assert_eq!(store.record("k", 160.0, window, 2).await.unwrap(), 1);
        assert_eq!(store.len("k"), 2);
    }

    #[tokio::test]
    async fn test_memory_store_failure() {
        let store = MemoryWindowStore::default();
        store.fail();

        let err = store
            .record("k", 1.0, Duration::from_secs(60), 1)
            .await
            .unwrap_err();
        assert!(err.is_store_fault());
    }

    /// Connect to the server named by `REDIS_URL`.
    async fn live_store() -> Option<(RedisWindowStore, redis::aio::MultiplexedConnection)> {
        let url = std::env::var("REDIS_URL").ok()?;
        let store = RedisWindowStore::connect(&url, Duration::from_secs(2))
            .await
            .unwrap();
        let raw = Client::open(url.as_str())
            .unwrap()
            .get_multiplexed_async_connection()
            .await
            .unwrap();
        Some((store, raw))
    }

    // Runs against a real server and calls `remove_all`, which clears every
    // `rate_limit:*` key on it.
    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn test_redis_script_against_live_server() {
        let Some((store, mut raw)) = live_store().await else {
            return;
        };
        let window = Duration::from_secs(60);
        let key = format!("it-{}", uuid::Uuid::new_v4());
        let stored = redis_key(&key);
        let now = SystemClock.epoch_secs();

        // count before insertion
        assert_eq!(store.record(&key, now, window, 2).await.unwrap(), 0);
        assert_eq!(store.record(&key, now + 1.0, window, 2).await.unwrap(), 1);

        // a rejected call records nothing
        assert_eq!(store.record(&key, now + 2.0, window, 2).await.unwrap(), 2);
        let members: u64 = redis::cmd("ZCARD").arg(&stored).query_async(&mut raw).await.unwrap();
        assert_eq!(members, 2);

        let ttl: i64 = redis::cmd("TTL").arg(&stored).query_async(&mut raw).await.unwrap();
        assert!(ttl > 0 && ttl <= 60, "ttl was {}", ttl);

        // the first entry slides out, the second stays
        assert_eq!(store.record(&key, now + 60.5, window, 2).await.unwrap(), 1);

        let unrelated = format!("other-{}", uuid::Uuid::new_v4());
        let _: () = redis::cmd("SET")
            .arg(&unrelated)
            .arg("kept")
            .query_async(&mut raw)
            .await
            .unwrap();

        store.remove_all().await.unwrap();

        let exists: u64 = redis::cmd("EXISTS").arg(&stored).query_async(&mut raw).await.unwrap();
        assert_eq!(exists, 0);
        let exists: u64 = redis::cmd("EXISTS").arg(&unrelated).query_async(&mut raw).await.unwrap();
        assert_eq!(exists, 1);

        let _: () = redis::cmd("DEL").arg(&unrelated).query_async(&mut raw).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn test_redis_remove_forgets_one_window() {
        let Some((store, mut raw)) = live_store().await else {
            return;
        };
        let window = Duration::from_secs(60);
        let kept = format!("it-{}", uuid::Uuid::new_v4());
        let dropped = format!("it-{}", uuid::Uuid::new_v4());
        let now = SystemClock.epoch_secs();

        store.record(&kept, now, window, 5).await.unwrap();
        store.record(&dropped, now, window, 5).await.unwrap();
        store.remove(&dropped).await.unwrap();

        assert_eq!(store.record(&dropped, now, window, 5).await.unwrap(), 0);
        assert_eq!(store.record(&kept, now, window, 5).await.unwrap(), 1);

        let _: () = redis::cmd("DEL")
            .arg(redis_key(&kept))
            .arg(redis_key(&dropped))
            .query_async(&mut raw)
            .await
            .unwrap();
    }
}
