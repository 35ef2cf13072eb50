use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

/// Short-lived locks and counters. Never a system of record.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Sets `key` only if absent, expiring after `ttl_secs`. Returns true when
    /// this caller now holds the key.
    async fn acquire(&self, key: &str, ttl_secs: u64) -> anyhow::Result<bool>;
    async fn release(&self, key: &str) -> anyhow::Result<()>;
    /// Increments a counter, starting its window on the first increment.
    async fn increment(&self, key: &str, window_secs: u64) -> anyhow::Result<u64>;
    async fn ping(&self) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn acquire(&self, key: &str, ttl_secs: u64) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn increment(&self, key: &str, window_secs: u64) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            // Set TTL only on first increment to avoid resetting the window on each hit
            let _: Result<(), _> = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(&mut conn)
                .await;
        }
        Ok(count)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Process-local cache for tests and single-node runs.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, (u64, Instant)>) -> R) -> R {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        f(&mut entries)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn acquire(&self, key: &str, ttl_secs: u64) -> anyhow::Result<bool> {
        Ok(self.with_live_entries(|entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(key.to_string(), (1, Instant::now() + Duration::from_secs(ttl_secs)));
            true
        }))
    }

    async fn release(&self, key: &str) -> anyhow::Result<()> {
        self.with_live_entries(|entries| entries.remove(key));
        Ok(())
    }

    async fn increment(&self, key: &str, window_secs: u64) -> anyhow::Result<u64> {
        Ok(self.with_live_entries(|entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| (0, Instant::now() + Duration::from_secs(window_secs)));
            entry.0 += 1;
            entry.0
        }))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_exclusive_until_released() {
        let cache = MemoryCache::new();
        assert!(cache.acquire("lead_creation_lock:1", 60).await.unwrap());
        assert!(!cache.acquire("lead_creation_lock:1", 60).await.unwrap());
        cache.release("lead_creation_lock:1").await.unwrap();
        assert!(cache.acquire("lead_creation_lock:1", 60).await.unwrap());
    }

    #[tokio::test]
    async fn counters_count_within_window() {
        let cache = MemoryCache::new();
        assert_eq!(cache.increment("rate:login:a@b.uz", 60).await.unwrap(), 1);
        assert_eq!(cache.increment("rate:login:a@b.uz", 60).await.unwrap(), 2);
        assert_eq!(cache.increment("rate:login:c@d.uz", 60).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zero_ttl_entries_expire_immediately() {
        let cache = MemoryCache::new();
        assert!(cache.acquire("k", 0).await.unwrap());
        assert!(cache.acquire("k", 0).await.unwrap());
    }
}
