//! Process-local statistics store, used by tests and single-node deployments

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ProxyStatsStore, StatsMutator};
use crate::error::{Result, ScrapeError};
use crate::models::ProxyUsageRecord;

/// Statistics store backed by a vector behind a mutex
#[derive(Default)]
pub struct InMemoryProxyStore {
    records: Mutex<Vec<ProxyUsageRecord>>,
    unreachable: AtomicBool,
}

impl InMemoryProxyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ProxyUsageRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            unreachable: AtomicBool::new(false),
        }
    }

    /// Insert or replace the record with the same id
    pub fn upsert(&self, record: ProxyUsageRecord) {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub fn remove(&self, id: i64) {
        self.records.lock().retain(|r| r.id != id);
    }

    pub fn get(&self, id: i64) -> Option<ProxyUsageRecord> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Simulate an outage: every call fails until reset
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ScrapeError::DatabaseConnection(
                "statistics store unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyStatsStore for InMemoryProxyStore {
    async fn get_all(&self) -> Result<Vec<ProxyUsageRecord>> {
        self.check_reachable()?;
        Ok(self.records.lock().clone())
    }

    async fn patch(&self, address: &str, mutator: StatsMutator) -> Result<bool> {
        self.check_reachable()?;
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.address() == address) {
            Some(record) => {
                mutator(record);
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<Duration> {
        self.check_reachable()?;
        Ok(Duration::ZERO)
    }
}
