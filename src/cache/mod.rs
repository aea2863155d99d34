//! Best-effort cache layer
//!
//! Every operation has a typed fallback: reads degrade to a miss and writes
//! to a silent success when Redis is unreachable or not configured. The cache
//! is never the source of truth: authorization codes, CSRF tokens, and
//! session revocations are all authoritative in the database; the cache only
//! shortens the hot path.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Namespace prefix for every key this process writes.
const KEY_PREFIX: &str = "authgw";

#[derive(Clone)]
pub struct Cache {
    manager: Option<ConnectionManager>,
    available: Arc<AtomicBool>,
}

impl Cache {
    /// Connect to Redis, or construct a disabled cache when no URL is
    /// configured or the connection fails. A failed connection is a warning,
    /// not an error: the system runs degraded.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            tracing::info!("No REDIS_URL configured, cache disabled (degraded mode)");
            return Self::disabled();
        };

        let client = match redis::Client::open(url) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Invalid Redis URL, cache disabled: {}", e);
                return Self::disabled();
            }
        };

        match ConnectionManager::new(client).await {
            Ok(manager) => {
                tracing::info!("Connected to Redis cache");
                Self {
                    manager: Some(manager),
                    available: Arc::new(AtomicBool::new(true)),
                }
            }
            Err(e) => {
                tracing::warn!("Redis connection failed, cache disabled: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self {
            manager: None,
            available: Arc::new(AtomicBool::new(false)),
        }
    }

    fn namespaced(key: &str) -> String {
        format!("{KEY_PREFIX}:{key}")
    }

    /// Log availability transitions once per flip instead of per call.
    fn note_result(&self, ok: bool, context: &str, err: Option<&redis::RedisError>) {
        if ok {
            if !self.available.swap(true, Ordering::Relaxed) {
                tracing::info!("Cache available again");
            }
        } else if self.available.swap(false, Ordering::Relaxed) {
            tracing::warn!(
                "Cache unavailable during {}: {}",
                context,
                err.map_or_else(|| "unknown".to_string(), ToString::to_string)
            );
        }
    }

    /// Liveness probe for /health.
    pub async fn healthy(&self) -> bool {
        let Some(manager) = &self.manager else {
            return false;
        };
        let mut conn = manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    /// Read a JSON value; unavailability and decode failures are misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let Some(manager) = &self.manager else {
            return None;
        };
        let mut conn = manager.clone();

        match conn.get::<_, Option<String>>(Self::namespaced(key)).await {
            Ok(value) => {
                self.note_result(true, "get", None);
                value.and_then(|raw| serde_json::from_str(&raw).ok())
            }
            Err(e) => {
                self.note_result(false, "get", Some(&e));
                None
            }
        }
    }

    /// Write a JSON value with a TTL; failures are silent successes.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let Some(manager) = &self.manager else {
            return;
        };
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };
        let mut conn = manager.clone();

        match conn
            .set_ex::<_, _, ()>(Self::namespaced(key), raw, ttl_secs)
            .await
        {
            Ok(()) => self.note_result(true, "set", None),
            Err(e) => self.note_result(false, "set", Some(&e)),
        }
    }

    /// Write a raw string value with a TTL.
    pub async fn set_string(&self, key: &str, value: &str, ttl_secs: u64) {
        let Some(manager) = &self.manager else {
            return;
        };
        let mut conn = manager.clone();

        match conn
            .set_ex::<_, _, ()>(Self::namespaced(key), value, ttl_secs)
            .await
        {
            Ok(()) => self.note_result(true, "set", None),
            Err(e) => self.note_result(false, "set", Some(&e)),
        }
    }

    /// Consume-and-delete read (authorization-code hashes, CSRF tokens).
    pub async fn take(&self, key: &str) -> Option<String> {
        let Some(manager) = &self.manager else {
            return None;
        };
        let mut conn = manager.clone();

        match conn
            .get_del::<_, Option<String>>(Self::namespaced(key))
            .await
        {
            Ok(value) => {
                self.note_result(true, "get_del", None);
                value
            }
            Err(e) => {
                self.note_result(false, "get_del", Some(&e));
                None
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        let Some(manager) = &self.manager else {
            return;
        };
        let mut conn = manager.clone();

        match conn.del::<_, ()>(Self::namespaced(key)).await {
            Ok(()) => self.note_result(true, "del", None),
            Err(e) => self.note_result(false, "del", Some(&e)),
        }
    }

    /// Sliding-window counter over a sorted set: trim entries older than the
    /// window, add this request, return the count. `None` means the cache is
    /// unavailable and the caller must fail open.
    pub async fn sliding_window_count(&self, key: &str, window_secs: u64) -> Option<i64> {
        let manager = self.manager.as_ref()?;
        let mut conn = manager.clone();

        let key = Self::namespaced(key);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let cutoff_ms = now_ms - (window_secs as i64) * 1000;
        let member = format!("{}-{}", now_ms, rand::random::<u32>());

        let result: redis::RedisResult<i64> = async {
            conn.zrembyscore::<_, _, _, ()>(&key, i64::MIN, cutoff_ms)
                .await?;
            conn.zadd::<_, _, _, ()>(&key, member, now_ms).await?;
            let count: i64 = conn.zcard(&key).await?;
            conn.expire::<_, ()>(&key, window_secs as i64).await?;
            Ok(count)
        }
        .await;

        match result {
            Ok(count) => {
                self.note_result(true, "sliding_window", None);
                Some(count)
            }
            Err(e) => {
                self.note_result(false, "sliding_window", Some(&e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A disabled cache must behave as all-misses without erroring: that is
    // the degraded mode the rest of the system relies on.
    #[tokio::test]
    async fn disabled_cache_reads_are_misses() {
        let cache = Cache::disabled();

        assert!(!cache.healthy().await);
        assert_eq!(cache.get_json::<String>("any").await, None);
        assert_eq!(cache.take("any").await, None);
    }

    #[tokio::test]
    async fn disabled_cache_writes_succeed_silently() {
        let cache = Cache::disabled();

        cache.set_json("k", &"v".to_string(), 60).await;
        cache.set_string("k", "v", 60).await;
        cache.delete("k").await;
        // Rate limiting must fail open
        assert_eq!(cache.sliding_window_count("k", 60).await, None);
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(Cache::namespaced("client:abc"), "authgw:client:abc");
    }
}
