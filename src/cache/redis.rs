use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use tracing::info;

use super::{CachedBody, DistributedCache};
use crate::error::{Result, ScrapeError};

/// Shared cache tier in Redis, one string key per body with a millisecond TTL
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ScrapeError::Cache(format!("invalid redis url: {}", e)))?;
        let manager = ConnectionManager::new(client).await?;
        info!("Connected to redis cache");

        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl DistributedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<CachedBody>> {
        let key = self.namespaced(key);
        let mut conn = self.manager.clone();

        let (body, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .cmd("GET")
            .arg(&key)
            .cmd("PTTL")
            .arg(&key)
            .query_async(&mut conn)
            .await?;

        Ok(body.map(|body| CachedBody {
            body: Bytes::from(body),
            // -1: no expiry set, -2: expired between the two commands
            ttl_remaining: u64::try_from(pttl).ok().map(Duration::from_millis),
        }))
    }

    async fn set(&self, key: &str, body: Bytes, ttl: Duration) -> Result<()> {
        let key = self.namespaced(key);
        let mut conn = self.manager.clone();

        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(body.as_ref())
            .arg("PX")
            .arg(ttl_ms(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(())
    }
}
