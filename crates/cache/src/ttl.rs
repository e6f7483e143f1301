//! TTL Cache Implementation

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default time-to-live of an entry
pub const DEFAULT_TTL: Duration = Duration::from_secs(3);

/// Cached payload with its insertion time
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

/// Outcome of a read-through lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

/// Key/value cache with a fixed expiry window measured from insertion.
///
/// There is no size bound; expired entries are dropped when read or by
/// [`TtlCache::purge_expired`].
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        info!("Creating cache (ttl: {:?})", ttl);
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a fresh entry. Expired entries are removed and reported absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(self.ttl) => Some(entry.data.clone()),
            Some(_) => {
                entries.remove(key);
                debug!("Cache entry expired: {}", key);
                None
            }
            None => None,
        }
    }

    /// Store a payload, replacing any previous entry and restarting its TTL
    pub fn set(&self, key: impl Into<String>, data: V) {
        let entry = CacheEntry {
            data,
            inserted_at: Instant::now(),
        };
        self.lock().insert(key.into(), entry);
    }

    /// Return the cached payload or load, store and return a fresh one.
    ///
    /// Load errors are returned as-is and nothing is cached.
    pub fn get_or_load<E>(
        &self,
        key: &str,
        load: impl FnOnce() -> Result<V, E>,
    ) -> Result<(V, CacheStatus), E> {
        if let Some(data) = self.get(key) {
            return Ok((data, CacheStatus::Hit));
        }

        // The lock is not held while loading; concurrent misses may both load.
        let data = load()?;
        self.set(key, data.clone());
        Ok((data, CacheStatus::Miss))
    }

    /// Remove every entry whose key starts with `prefix`
    pub fn clear(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        debug!("Cleared {} cache entries with prefix '{}'", removed, prefix);
        removed
    }

    /// Remove every entry
    pub fn clear_all(&self) -> usize {
        let mut entries = self.lock();
        let removed = entries.len();
        entries.clear();
        info!("Cleared cache ({} entries)", removed);
        removed
    }

    /// Drop entries past their TTL
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(self.ttl));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        // Entries are plain values; a panic elsewhere cannot leave one half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_read_within_ttl_returns_payload() {
        let cache = TtlCache::default();
        cache.set("org-1:budget-domains", vec!["IT", "RH"]);

        advance(Duration::from_millis(2_999)).await;
        assert_eq!(cache.get("org-1:budget-domains"), Some(vec!["IT", "RH"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_ttl_is_miss() {
        let cache = TtlCache::default();
        cache.set("k", 42u32);

        advance(Duration::from_secs(3)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_counts_from_insertion_not_access() {
        let cache = TtlCache::default();
        cache.set("k", 1u8);

        advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k"), Some(1));
        advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_load() {
        let cache = TtlCache::default();

        let (value, status) = cache.get_or_load("k", || Ok::<_, ()>(7)).unwrap();
        assert_eq!((value, status), (7, CacheStatus::Miss));

        let (value, status) = cache.get_or_load("k", || Ok::<_, ()>(8)).unwrap();
        assert_eq!((value, status), (7, CacheStatus::Hit));

        advance(Duration::from_secs(5)).await;
        let (value, status) = cache.get_or_load("k", || Ok::<_, ()>(8)).unwrap();
        assert_eq!((value, status), (8, CacheStatus::Miss));
    }

    #[test]
    fn test_load_error_is_not_cached() {
        let cache: TtlCache<u32> = TtlCache::default();
        assert_eq!(cache.get_or_load("k", || Err("db down")), Err("db down"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = TtlCache::new(Duration::from_secs(1));
        cache.set("old", 1);
        advance(Duration::from_secs(2)).await;
        cache.set("new", 2);

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new"), Some(2));
    }

    #[test]
    fn test_clear_all() {
        let cache = TtlCache::default();
        for i in 0..10 {
            cache.set(format!("org-{}:types", i), i);
        }
        assert_eq!(cache.clear_all(), 10);
        for i in 0..10 {
            assert_eq!(cache.get(&format!("org-{}:types", i)), None);
        }
    }

    proptest! {
        #[test]
        fn prop_clear_prefix_removes_exactly_matching_keys(
            keys in proptest::collection::hash_set("[ab]{1,4}", 0..20),
            prefix in "[ab]{1,2}",
        ) {
            let cache = TtlCache::new(Duration::from_secs(60));
            for key in &keys {
                cache.set(key.clone(), key.len());
            }

            let expected = keys.iter().filter(|k| k.starts_with(&prefix)).count();
            prop_assert_eq!(cache.clear(&prefix), expected);

            for key in &keys {
                prop_assert_eq!(cache.get(key).is_some(), !key.starts_with(&prefix));
            }
        }
    }
}
