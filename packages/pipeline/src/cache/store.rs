//! Key-value cache with TTL, shared by status maps, locks, and circuit
//! breakers.
//!
//! The cache accelerates status checks; it is never the sole record of
//! correctness-critical data. Everything in it can be rebuilt from the
//! durable store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

/// Cache operations used by the pipeline.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Set only if the key does not exist. Returns true when the value
    /// was written. Basis of the distributed lock.
    async fn set_nx_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete only if the current value matches. Returns true when
    /// deleted. Used for token-checked lock release.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;

    /// Increment a counter, setting the TTL on first increment.
    /// Returns the new count.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64>;
}

/// Store a serializable value under a TTL.
pub async fn set_json<T: Serialize>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let encoded = serde_json::to_string(value).context("failed to serialize cache value")?;
    cache.set_with_ttl(key, &encoded, ttl).await
}

/// Fetch and deserialize a cached value. A corrupt entry is treated as
/// a miss: the durable store is authoritative.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => Ok(serde_json::from_str(&raw).ok()),
        None => Ok(None),
    }
}

/// Redis-backed cache store.
pub struct RedisCacheStore {
    conn: ConnectionManager,
}

impl RedisCacheStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        // Check-and-delete must be atomic or a lock could release a
        // successor's lock after its own TTL expired.
        let script = redis::Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            else
                return 0
            end
            "#,
        );

        let mut conn = self.conn.clone();
        let deleted: i64 = script.key(key).arg(value).invoke_async(&mut conn).await?;
        Ok(deleted > 0)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(ttl.as_millis() as u64)
                .query_async::<()>(&mut conn)
                .await?;
        }
        Ok(count)
    }
}

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process cache store for tests and single-node development.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(entry: &Entry) -> bool {
        entry.expires_at > Instant::now()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|e| Self::live(e))
            .map(|e| e.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_nx_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;

        if entries.get(key).map(Self::live).unwrap_or(false) {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if Self::live(entry) && entry.value == value => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut entries = self.entries.lock().await;

        let next = match entries.get(key).filter(|e| Self::live(e)) {
            Some(entry) => entry.value.parse::<i64>().unwrap_or(0) + 1,
            None => 1,
        };

        let expires_at = if next == 1 {
            Instant::now() + ttl
        } else {
            entries[key].expires_at
        };

        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let cache = InMemoryCacheStore::new();
        cache
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn expired_entries_read_as_miss() {
        let cache = InMemoryCacheStore::new();
        cache
            .set_with_ttl("k", "v", Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_nx_respects_existing_key() {
        let cache = InMemoryCacheStore::new();
        assert!(cache
            .set_nx_with_ttl("k", "a", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!cache
            .set_nx_with_ttl("k", "b", Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn delete_if_equals_only_matches_own_value() {
        let cache = InMemoryCacheStore::new();
        cache
            .set_with_ttl("k", "mine", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!cache.delete_if_equals("k", "theirs").await.unwrap());
        assert!(cache.delete_if_equals("k", "mine").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_counts_up() {
        let cache = InMemoryCacheStore::new();
        assert_eq!(
            cache.incr_with_ttl("c", Duration::from_secs(60)).await.unwrap(),
            1
        );
        assert_eq!(
            cache.incr_with_ttl("c", Duration::from_secs(60)).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn json_helpers_roundtrip() {
        let cache = InMemoryCacheStore::new();
        set_json(&cache, "j", &vec![1, 2, 3], Duration::from_secs(60))
            .await
            .unwrap();
        let value: Option<Vec<i32>> = get_json(&cache, "j").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }
}
