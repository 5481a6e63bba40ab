//! Two-tier response cache
//!
//! Reads go to process memory first and fall back to the distributed tier,
//! copying hits into memory for their remaining lifetime. Writes go to the
//! distributed tier only. Cache failures degrade to misses.

pub mod key;
pub mod memory;
pub mod redis;
pub mod sweep;

pub use key::{cache_key, redact_url};
pub use memory::MemoryCache;
pub use self::redis::RedisCache;
pub use sweep::{CacheSweepHandle, CacheSweepService};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::Result;

/// A body read back from a cache tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBody {
    pub body: Bytes,
    /// `None` when the tier does not know the entry's expiry
    pub ttl_remaining: Option<Duration>,
}

/// Shared cache tier that survives process restarts
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedBody>>;

    async fn set(&self, key: &str, body: Bytes, ttl: Duration) -> Result<()>;

    /// Drop expired entries held locally; tiers with server-side expiry keep the default
    fn purge_expired(&self) -> usize {
        0
    }
}

pub struct ResponseCache {
    memory: MemoryCache,
    distributed: Arc<dyn DistributedCache>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(
        memory: MemoryCache,
        distributed: Arc<dyn DistributedCache>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            memory,
            distributed,
            default_ttl,
        }
    }

    /// Cache with an in-process stand-in for the distributed tier
    pub fn in_memory(max_entries: usize, default_ttl: Duration) -> Self {
        Self::new(
            MemoryCache::new(max_entries),
            Arc::new(MemoryCache::new(max_entries)),
            default_ttl,
        )
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(body) = self.memory.get(key) {
            debug!(key = %key, tier = "memory", "Cache hit");
            return Some(body);
        }

        match self.distributed.get(key).await {
            Ok(Some(cached)) => {
                debug!(key = %key, tier = "distributed", "Cache hit");
                let ttl = cached.ttl_remaining.unwrap_or(self.default_ttl);
                self.memory.insert(key, cached.body.clone(), ttl);
                Some(cached.body)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Distributed cache read failed");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, body: Bytes, ttl: Duration) {
        if let Err(e) = self.distributed.set(key, body, ttl).await {
            warn!(key = %key, error = %e, "Distributed cache write failed");
        }
    }

    /// Entries currently held in process memory
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Sweep expired entries from every tier that holds them in process
    pub fn purge_expired(&self) -> usize {
        self.memory.purge_expired() + self.distributed.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;
    use parking_lot::Mutex;

    const TTL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Distributed tier that records calls and can be made to fail
    #[derive(Default)]
    struct FlakyTier {
        inner: Mutex<Option<CachedBody>>,
        failing: bool,
    }

    #[async_trait]
    impl DistributedCache for FlakyTier {
        async fn get(&self, _key: &str) -> Result<Option<CachedBody>> {
            if self.failing {
                return Err(ScrapeError::Cache("connection refused".into()));
            }
            Ok(self.inner.lock().clone())
        }

        async fn set(&self, _key: &str, body: Bytes, ttl: Duration) -> Result<()> {
            if self.failing {
                return Err(ScrapeError::Cache("connection refused".into()));
            }
            *self.inner.lock() = Some(CachedBody {
                body,
                ttl_remaining: Some(ttl),
            });
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_round_trip_and_expiry() {
        let cache = ResponseCache::in_memory(100, TTL);
        let body = Bytes::from_static(b"<html>listing</html>");

        cache.set("k", body.clone(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(body));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_does_not_populate_memory() {
        let cache = ResponseCache::in_memory(100, TTL);
        cache.set("k", Bytes::from_static(b"x"), TTL).await;
        assert_eq!(cache.memory_len(), 0);

        cache.get("k").await;
        assert_eq!(cache.memory_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distributed_hit_uses_remaining_ttl() {
        let tier = Arc::new(FlakyTier::default());
        *tier.inner.lock() = Some(CachedBody {
            body: Bytes::from_static(b"x"),
            ttl_remaining: Some(Duration::from_secs(10)),
        });
        let cache = ResponseCache::new(MemoryCache::new(10), tier.clone(), TTL);

        assert!(cache.get("k").await.is_some());
        *tier.inner.lock() = None;

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get("k").await.is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_distributed_hit_without_ttl_uses_default() {
        let tier = Arc::new(FlakyTier::default());
        *tier.inner.lock() = Some(CachedBody {
            body: Bytes::from_static(b"x"),
            ttl_remaining: None,
        });
        let cache = ResponseCache::new(
            MemoryCache::new(10),
            tier.clone(),
            Duration::from_secs(u64::MAX),
        );

        assert!(cache.get("k").await.is_some());
        *tier.inner.lock() = None;
        assert!(cache.get("k").await.is_some());
    }

    #[tokio::test]
    async fn test_huge_default_ttl_does_not_overflow() {
        let cache = ResponseCache::in_memory(10, Duration::from_secs(u64::MAX));
        cache
            .set("k", Bytes::from_static(b"x"), cache.default_ttl())
            .await;
        assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"x")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_sweeps_both_tiers() {
        let cache = ResponseCache::in_memory(10, TTL);
        cache.set("a", Bytes::from_static(b"1"), Duration::from_secs(5)).await;
        cache.set("b", Bytes::from_static(b"2"), Duration::from_secs(5)).await;
        cache.get("a").await;

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.purge_expired(), 3);
        assert_eq!(cache.memory_len(), 0);
    }

    #[tokio::test]
    async fn test_distributed_failures_degrade_to_miss() {
        let tier = Arc::new(FlakyTier {
            failing: true,
            ..Default::default()
        });
        let cache = ResponseCache::new(MemoryCache::new(10), tier, TTL);

        cache.set("k", Bytes::from_static(b"x"), TTL).await;
        assert!(cache.get("k").await.is_none());
    }
}
