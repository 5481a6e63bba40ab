//! Process-local cache tier

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::{CachedBody, DistributedCache};
use crate::error::Result;

/// Longest lifetime any entry is kept for
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct MemoryEntry {
    body: Bytes,
    expires_at: Instant,
}

/// Concurrent map of bodies with absolute expiry and a soft entry limit
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.get_with_ttl(key).map(|cached| cached.body)
    }

    fn get_with_ttl(&self, key: &str) -> Option<CachedBody> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.expires_at <= now {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
            return None;
        }

        Some(CachedBody {
            body: entry.body.clone(),
            ttl_remaining: Some(entry.expires_at - now),
        })
    }

    pub fn insert(&self, key: impl Into<String>, body: Bytes, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.min(MAX_CACHE_TTL))
            .unwrap_or(now);

        let key = key.into();
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.make_room();
        }

        self.entries.insert(
            key,
            MemoryEntry {
                body,
                expires_at,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Purge expired entries, then evict the ones closest to expiry
    fn make_room(&self) {
        let purged = self.purge_expired();
        let target = self.max_entries - self.max_entries / 10 - 1;
        if self.entries.len() <= target {
            debug!(purged, "Memory cache purged expired entries");
            return;
        }

        let mut by_expiry: Vec<(Instant, String)> = self
            .entries
            .iter()
            .map(|e| (e.value().expires_at, e.key().clone()))
            .collect();
        by_expiry.sort();

        let excess = self.entries.len() - target;
        for (_, key) in by_expiry.into_iter().take(excess) {
            self.entries.remove(&key);
        }

        debug!(purged, evicted = excess, "Memory cache evicted entries");
    }
}

/// Lets the memory tier stand in for the distributed tier when no shared
/// store is configured.
#[async_trait]
impl DistributedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CachedBody>> {
        Ok(self.get_with_ttl(key))
    }

    async fn set(&self, key: &str, body: Bytes, ttl: Duration) -> Result<()> {
        self.insert(key, body, ttl);
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        MemoryCache::purge_expired(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new(10);
        cache.insert("k", Bytes::from_static(b"body"), Duration::from_secs(60));

        assert_eq!(cache.get("k"), Some(Bytes::from_static(b"body")));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("k").is_some());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_ttl_is_reported() {
        let cache = MemoryCache::new(10);
        cache.insert("k", Bytes::from_static(b"body"), Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(15)).await;

        let cached = DistributedCache::get(&cache, "k").await.unwrap().unwrap();
        assert_eq!(cached.ttl_remaining, Some(Duration::from_secs(45)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_expired_then_nearest_expiry() {
        let cache = MemoryCache::new(3);
        cache.insert("short", Bytes::from_static(b"1"), Duration::from_secs(10));
        cache.insert("mid", Bytes::from_static(b"2"), Duration::from_secs(100));
        cache.insert("long", Bytes::from_static(b"3"), Duration::from_secs(1000));

        cache.insert("new", Bytes::from_static(b"4"), Duration::from_secs(500));
        assert!(cache.len() <= 3);
        assert!(cache.get("short").is_none());
        assert!(cache.get("long").is_some());
        assert!(cache.get("new").is_some());

        tokio::time::advance(Duration::from_secs(200)).await;
        cache.insert("later", Bytes::from_static(b"5"), Duration::from_secs(50));
        assert!(cache.get("mid").is_none());
        assert!(cache.get("later").is_some());
    }

    #[test]
    fn test_zero_ttl_is_not_stored() {
        let cache = MemoryCache::new(10);
        cache.insert("k", Bytes::from_static(b"x"), Duration::ZERO);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_is_clamped() {
        let cache = MemoryCache::new(10);
        cache.insert("k", Bytes::from_static(b"x"), Duration::from_secs(u64::MAX));

        let cached = DistributedCache::get(&cache, "k").await.unwrap().unwrap();
        assert_eq!(cached.ttl_remaining, Some(MAX_CACHE_TTL));

        tokio::time::advance(MAX_CACHE_TTL).await;
        assert!(cache.get("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryCache::new(10);
        cache.insert("a", Bytes::from_static(b"1"), Duration::from_secs(1));
        cache.insert("b", Bytes::from_static(b"2"), Duration::from_secs(100));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
