//! Cache adapter with TTL categories and rate limiting
//!
//! Provides:
//! - The `CacheStore` trait over keyed put/get with TTLs
//! - A Redis backend with connection management and key namespacing
//! - An in-memory backend for tests and cache-less boot
//! - Key builders for the search / embedding / query-rewrite categories
//! - A windowed rate-limit counter

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
}

/// Keyed put/get with TTLs plus a windowed counter
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a raw value
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// Set a raw value with a TTL
    async fn put_raw(&self, key: &str, value: String, ttl_secs: u64) -> Result<()>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key in this cache's namespace
    async fn flush(&self) -> Result<()>;

    /// Count keys in this cache's namespace
    async fn total_keys(&self) -> Result<u64>;

    /// Increment a counter, setting the window expiry on first increment
    async fn increment(&self, key: &str, window_secs: u64) -> Result<u64>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;
}

/// JSON helpers and the rate-limit decision, shared by every backend
#[async_trait]
pub trait CacheStoreExt: CacheStore {
    /// Get and deserialize a cached value
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => {
                let parsed = serde_json::from_str(&raw)?;
                debug!(key = %key, "Cache hit");
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Serialize and store a value with a TTL
    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.put_raw(key, raw, ttl_secs).await
    }

    /// Check the windowed rate limit for an identifier
    async fn rate_limit(
        &self,
        identifier: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<RateLimitDecision> {
        let key = keys::rate_limit(identifier);
        let count = self.increment(&key, window_secs).await?;
        let allowed = count <= limit as u64;
        let remaining = (limit as u64).saturating_sub(count) as u32;
        Ok(RateLimitDecision { allowed, remaining })
    }
}

impl<T: CacheStore + ?Sized> CacheStoreExt for T {}

/// Redis cache client
pub struct RedisCache {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
}

impl RedisCache {
    /// Connect and build a namespaced cache
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::unavailable("cache", format!("invalid Redis URL: {}", e)))?;

        let connection = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: key_prefix.to_string(),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Collect every key in this namespace via SCAN
    async fn scan_keys(&self) -> Result<Vec<String>> {
        let pattern = format!("{}:*", self.key_prefix);
        let mut conn = self.connection.write().await;
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut *conn)
                .await?;
            found.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;
        let value: Option<String> = conn.get(&full_key).await?;
        Ok(value)
    }

    async fn put_raw(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;
        conn.set_ex::<_, _, ()>(&full_key, value, ttl_secs).await?;
        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;
        let deleted: i32 = conn.del(&full_key).await?;
        Ok(deleted > 0)
    }

    async fn flush(&self) -> Result<()> {
        let found = self.scan_keys().await?;
        if found.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.write().await;
        let removed: u64 = conn.del(&found).await?;
        debug!(removed, "Cache flushed");
        Ok(())
    }

    async fn total_keys(&self) -> Result<u64> {
        Ok(self.scan_keys().await?.len() as u64)
    }

    async fn increment(&self, key: &str, window_secs: u64) -> Result<u64> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;
        let count: u64 = conn.incr(&full_key, 1u64).await?;
        if count == 1 {
            conn.expire::<_, ()>(&full_key, window_secs as i64).await?;
        }
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }
}

type MemoryEntry = (String, Option<Instant>);

/// In-memory cache with TTL, for tests and cache-less boot
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(entry: &MemoryEntry) -> Option<String> {
        match entry.1 {
            Some(deadline) if Instant::now() >= deadline => None,
            _ => Some(entry.0.clone()),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().expect("cache lock");
        match entries.get(key).map(Self::live_value) {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_raw(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        let deadline = (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
        self.entries
            .lock()
            .expect("cache lock")
            .insert(key.to_string(), (value, deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .expect("cache lock")
            .remove(key)
            .is_some())
    }

    async fn flush(&self) -> Result<()> {
        self.entries.lock().expect("cache lock").clear();
        Ok(())
    }

    async fn total_keys(&self) -> Result<u64> {
        let entries = self.entries.lock().expect("cache lock");
        Ok(entries.values().filter(|e| Self::live_value(e).is_some()).count() as u64)
    }

    async fn increment(&self, key: &str, window_secs: u64) -> Result<u64> {
        let mut entries = self.entries.lock().expect("cache lock");
        let current = entries
            .get(key)
            .and_then(Self::live_value)
            .and_then(|v| v.parse::<u64>().ok());
        match current {
            Some(count) => {
                let next = count + 1;
                // Window expiry was set on the first increment; keep it
                let deadline = entries.get(key).and_then(|e| e.1);
                entries.insert(key.to_string(), (next.to_string(), deadline));
                Ok(next)
            }
            None => {
                let deadline = Instant::now() + Duration::from_secs(window_secs);
                entries.insert(key.to_string(), ("1".to_string(), Some(deadline)));
                Ok(1)
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Create a cache backend based on configuration
///
/// Falls back to the in-memory cache when no Redis URL is configured.
pub async fn create_cache(config: &crate::config::CacheConfig) -> Result<std::sync::Arc<dyn CacheStore>> {
    match &config.url {
        Some(url) => {
            let cache = RedisCache::connect(url, &config.key_prefix).await?;
            Ok(std::sync::Arc::new(cache))
        }
        None => {
            tracing::warn!("No cache URL configured, using in-memory cache");
            Ok(std::sync::Arc::new(MemoryCache::new()))
        }
    }
}

/// Cache key builders
///
/// Every key embeds a hex digest of the serialized input so lookups stay
/// bounded regardless of query size.
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Hex digest of arbitrary bytes
    pub fn hash_hex(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    /// Hex digest of an embedding vector
    pub fn hash_vector(vector: &[f32]) -> String {
        let mut bytes = Vec::with_capacity(vector.len() * 4);
        for value in vector {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        hash_hex(&bytes)
    }

    /// Build a cached-search key for a query embedding (TTL ~1h)
    pub fn search_results(mode: &str, query_vec: &[f32]) -> String {
        format!("search:{}:{}", mode, hash_vector(query_vec))
    }

    /// Build an embedding cache key (TTL ~24h)
    pub fn embedding(model: &str, text: &str) -> String {
        format!("embedding:{}", hash_hex(format!("{}:{}", model, text).as_bytes()))
    }

    /// Build a query-rewrite cache key (TTL ~1h)
    pub fn query_rewrite(query: &str) -> String {
        format!("query-rewrite:{}", hash_hex(query.as_bytes()))
    }

    /// Build a rate-limit counter key
    pub fn rate_limit(identifier: &str) -> String {
        format!("rate-limit:{}", identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_put_get() {
        let cache = MemoryCache::new();
        cache
            .put_json("k", &vec![1u32, 2, 3], 60)
            .await
            .unwrap();
        let got: Option<Vec<u32>> = cache.get_json("k").await.unwrap();
        assert_eq!(got, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let cache = MemoryCache::new();
        cache.put_raw("k", "v".into(), 0).await.unwrap();
        // ttl 0 means no expiry
        assert_eq!(cache.get_raw("k").await.unwrap(), Some("v".to_string()));

        cache
            .entries
            .lock()
            .unwrap()
            .insert("gone".into(), ("v".into(), Some(Instant::now())));
        assert_eq!(cache.get_raw("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rate_limit_counter() {
        let cache = MemoryCache::new();
        let first = cache.rate_limit("client-a", 2, 60).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);

        let second = cache.rate_limit("client-a", 2, 60).await.unwrap();
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = cache.rate_limit("client-a", 2, 60).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[tokio::test]
    async fn test_flush_and_total_keys() {
        let cache = MemoryCache::new();
        cache.put_raw("a", "1".into(), 60).await.unwrap();
        cache.put_raw("b", "2".into(), 60).await.unwrap();
        assert_eq!(cache.total_keys().await.unwrap(), 2);
        cache.flush().await.unwrap();
        assert_eq!(cache.total_keys().await.unwrap(), 0);
    }

    #[test]
    fn test_key_builders() {
        assert!(keys::embedding("m", "text").starts_with("embedding:"));
        assert!(keys::query_rewrite("q").starts_with("query-rewrite:"));
        assert!(keys::rate_limit("id").starts_with("rate-limit:"));
        assert!(keys::search_results("hybrid", &[0.1, 0.2]).starts_with("search:hybrid:"));
        // Same vector hashes identically
        assert_eq!(
            keys::search_results("hybrid", &[0.1, 0.2]),
            keys::search_results("hybrid", &[0.1, 0.2])
        );
    }
}
