//! In-memory result cache with per-entry TTL.
//!
//! Values are stored type-erased behind an `Arc`, so concurrent readers of
//! an unexpired entry share one value instead of recomputing it. Expiry is
//! checked lazily on `get`; there is no sweeper task.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;

/// Default TTL when none is configured
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Shared TTL cache addressed by string keys.
///
/// Keys are expected to carry a session scope prefix (see
/// [`crate::session::Session::cache_key`]) so that principals never read
/// each other's results.
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up `key`. Expired entries and entries of a different type are
    /// misses; expired ones are evicted.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                None => {
                    tracing::debug!(key, "Cache miss");
                    return None;
                }
                Some(entry) if !entry.is_expired(now) => {
                    return match Arc::clone(&entry.value).downcast::<T>() {
                        Ok(value) => {
                            tracing::debug!(key, "Cache hit");
                            Some(value)
                        }
                        Err(_) => {
                            tracing::warn!(key, "Cache entry has unexpected type");
                            None
                        }
                    };
                }
                Some(_) => {}
            }
        }

        // Re-check under the write lock: a concurrent `set` may have replaced it.
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
            tracing::debug!(key, "Cache expired");
        }
        None
    }

    /// Store `value` under `key` for `ttl`, returning the shared value.
    pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T, ttl: Duration) -> Arc<T> {
        let value = Arc::new(value);
        self.set_arc(key, Arc::clone(&value), ttl);
        value
    }

    /// Store `value` for the default TTL.
    pub fn set_default<T: Any + Send + Sync>(&self, key: &str, value: T) -> Arc<T> {
        self.set(key, value, self.default_ttl())
    }

    pub fn set_arc<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
        tracing::debug!(key, ttl_ms = ttl.as_millis() as u64, "Cache set");
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Drop every entry whose key starts with `prefix`. Returns the count.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        tracing::debug!(prefix, removed, "Cache invalidated by prefix");
        removed
    }

    pub fn invalidate_all(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
        tracing::debug!("Cache cleared");
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl_returns_value() {
        let cache = ResultCache::default();
        cache.set("s1:decks", vec![1, 2, 3], Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        let value = cache.get::<Vec<i32>>("s1:decks").unwrap();
        assert_eq!(*value, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_is_miss_and_evicts() {
        let cache = ResultCache::default();
        cache.set("s1:decks", 42u32, Duration::from_secs(10));
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.get::<u32>("s1:decks").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_concurrent_reads_share_value() {
        let cache = ResultCache::default();
        cache.set_default("k", String::from("shared"));

        let a = cache.get::<String>("k").unwrap();
        let b = cache.get::<String>("k").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_type_mismatch_is_miss() {
        let cache = ResultCache::default();
        cache.set_default("k", 7u64);
        assert!(cache.get::<String>("k").is_none());
        // Entry is not expired, so it stays
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_prefix_only_touches_scope() {
        let cache = ResultCache::default();
        cache.set_default("aaaa:words:all:all", 1u8);
        cache.set_default("aaaa:decks", 2u8);
        cache.set_default("bbbb:decks", 3u8);

        assert_eq!(cache.invalidate_prefix("aaaa:"), 2);
        assert!(cache.get::<u8>("aaaa:decks").is_none());
        assert_eq!(*cache.get::<u8>("bbbb:decks").unwrap(), 3);
    }

    #[test]
    fn test_invalidate_all() {
        let cache = ResultCache::default();
        cache.set_default("a", 1u8);
        cache.set_default("b", 2u8);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_replaces_existing_entry() {
        let cache = ResultCache::default();
        cache.set_default("k", 1u8);
        cache.set_default("k", 2u8);
        assert_eq!(*cache.get::<u8>("k").unwrap(), 2);
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
    }
}
