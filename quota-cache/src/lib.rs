//! Short-TTL Redis cache for container/image listings (Component D).
//!
//! Every method degrades to "no cached value" on any backend failure; a
//! cache miss or a Redis outage is never surfaced past this layer as an
//! error callers must handle, since the sync/engine components always have
//! a live-read fallback available.

use common::constants::{CACHE_KEY_CONTAINERS, CACHE_KEY_IMAGES, CACHE_KEY_LAST_INVALIDATION};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CacheEnvelope<T> {
    timestamp: f64,
    payload: T,
}

fn now_unix() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64()
}

/// Wraps a `ConnectionManager`; constructing one never fails hard since a
/// missing/unreachable Redis is a configuration choice, not a startup error.
#[derive(Clone)]
pub struct QuotaCache {
    conn: Option<ConnectionManager>,
    ttl_seconds: u64,
}

impl QuotaCache {
    pub async fn connect(redis_url: Option<&str>, ttl_seconds: u64) -> Self {
        let conn = match redis_url {
            Some(url) => match redis::Client::open(url) {
                Ok(client) => match client.get_connection_manager().await {
                    Ok(mgr) => Some(mgr),
                    Err(err) => {
                        tracing::warn!(error = %err, "cache backend unreachable, continuing without cache");
                        None
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "invalid redis url, continuing without cache");
                    None
                }
            },
            None => None,
        };
        QuotaCache { conn, ttl_seconds }
    }

    pub fn disabled() -> Self {
        QuotaCache { conn: None, ttl_seconds: common::constants::DEFAULT_CACHE_TTL_SECONDS }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone()?;
        let raw: Option<String> = conn.get(key).await.ok().flatten();
        let raw = raw?;
        let envelope: CacheEnvelope<T> = match serde_json::from_str(&raw) {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, %key, "cache payload malformed, treating as miss");
                return None;
            }
        };
        let age = now_unix() - envelope.timestamp;
        if age < 0.0 || age >= self.ttl_seconds as f64 {
            common::metrics::record_cache_lookup(key, false);
            return None;
        }
        common::metrics::record_cache_lookup(key, true);
        Some(envelope.payload)
    }

    async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let Some(mut conn) = self.conn.clone() else { return };
        let envelope = CacheEnvelope { timestamp: now_unix(), payload: value };
        match serde_json::to_string(&envelope) {
            Ok(body) => {
                if let Err(err) = conn.set_ex::<_, _, ()>(key, body, self.ttl_seconds).await {
                    tracing::warn!(error = %err, %key, "cache write failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, %key, "cache payload could not be serialized"),
        }
    }

    async fn invalidate(&self, key: &str) {
        let Some(mut conn) = self.conn.clone() else { return };
        if let Err(err) = conn.del::<_, ()>(key).await {
            tracing::debug!(error = %err, %key, "cache invalidation failed");
            return;
        }
        let _: Result<(), _> = conn.set(CACHE_KEY_LAST_INVALIDATION, now_unix()).await;
    }

    pub async fn get_containers<T: DeserializeOwned>(&self) -> Option<T> {
        self.get(CACHE_KEY_CONTAINERS).await
    }

    pub async fn set_containers<T: Serialize>(&self, value: &T) {
        self.set(CACHE_KEY_CONTAINERS, value).await
    }

    pub async fn invalidate_containers(&self) {
        self.invalidate(CACHE_KEY_CONTAINERS).await
    }

    pub async fn get_images<T: DeserializeOwned>(&self) -> Option<T> {
        self.get(CACHE_KEY_IMAGES).await
    }

    pub async fn set_images<T: Serialize>(&self, value: &T) {
        self.set(CACHE_KEY_IMAGES, value).await
    }

    pub async fn invalidate_images(&self) {
        self.invalidate(CACHE_KEY_IMAGES).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_cache_misses_everything() {
        let cache = QuotaCache::disabled();
        assert!(!cache.is_enabled());
        let containers: Option<Vec<String>> = cache.get_containers().await;
        assert!(containers.is_none());
        cache.set_containers(&vec!["c1".to_string()]).await;
        cache.invalidate_containers().await;
    }

    #[tokio::test]
    async fn test_connect_with_unreachable_url_degrades() {
        let cache = QuotaCache::connect(Some("redis://127.0.0.1:1"), 600).await;
        // get_connection_manager may succeed lazily; either way, reads must not panic.
        let _: Option<Vec<String>> = cache.get_containers().await;
    }
}
