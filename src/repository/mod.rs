//! Proxy statistics store
//!
//! The pool only needs two operations from the store: read every record, and
//! apply an in-place mutation to the record of one proxy address.

pub mod memory;
pub mod proxy;

pub use memory::InMemoryProxyStore;
pub use proxy::ProxyRepository;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ProxyUsageRecord;

/// Mutation applied to a single stored record
pub type StatsMutator = Box<dyn FnOnce(&mut ProxyUsageRecord) + Send>;

/// Durable key/value store of proxy descriptors and usage counters
#[async_trait]
pub trait ProxyStatsStore: Send + Sync {
    /// Fetch every stored proxy record
    async fn get_all(&self) -> Result<Vec<ProxyUsageRecord>>;

    /// Apply `mutator` to the record stored under `address` (`host:port`).
    ///
    /// Returns `false` when no record matches the address.
    async fn patch(&self, address: &str, mutator: StatsMutator) -> Result<bool>;

    /// Round-trip to the store, returning its latency
    async fn health_check(&self) -> Result<Duration>;
}

/// Split a `host:port` address key
pub(crate) fn split_address(address: &str) -> Option<(&str, i32)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse::<i32>().ok()?;
    if host.is_empty() {
        return None;
    }
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("10.0.0.1:8080"), Some(("10.0.0.1", 8080)));
        assert_eq!(
            split_address("proxy.example:3128"),
            Some(("proxy.example", 3128))
        );
        assert_eq!(split_address("10.0.0.1"), None);
        assert_eq!(split_address(":8080"), None);
        assert_eq!(split_address("10.0.0.1:http"), None);
    }
}
