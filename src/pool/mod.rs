//! Proxy pool
//!
//! In-memory mirror of the statistics store. All mutable state lives behind a
//! single mutex; selection, outcome recording and refresh all take it, so a
//! refresh is never observed half-applied. Store writes happen on spawned
//! tasks tracked by the pool and can be awaited with [`ProxyPool::flush`].

pub mod binding;
pub mod cooldown;
pub mod refresh;

pub use binding::RequestBinding;
pub use cooldown::extend_cooldown;
pub use refresh::{PoolRefreshHandle, PoolRefreshService};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::models::{ProxyDescriptor, ProxySnapshot, ProxyUsageRecord};
use crate::repository::{ProxyStatsStore, StatsMutator};

/// What changed during a refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub added: usize,
    pub updated: usize,
    /// Ids that left the pool
    pub removed: Vec<i64>,
    /// Store records skipped because they cannot describe a usable proxy
    pub malformed: usize,
}

#[derive(Default)]
struct PoolState {
    proxies: BTreeMap<i64, ProxyDescriptor>,
    last_refresh: Option<DateTime<Utc>>,
}

pub struct ProxyPool {
    store: Arc<dyn ProxyStatsStore>,
    state: Mutex<PoolState>,
    rate_limit_cooldown: Duration,
    persist_tasks: TaskTracker,
}

impl ProxyPool {
    pub fn new(store: Arc<dyn ProxyStatsStore>, rate_limit_cooldown: Duration) -> Self {
        Self {
            store,
            state: Mutex::new(PoolState::default()),
            rate_limit_cooldown,
            persist_tasks: TaskTracker::new(),
        }
    }

    /// Cooldown applied when a destination answers 429
    pub fn rate_limit_cooldown(&self) -> Duration {
        self.rate_limit_cooldown
    }

    /// Reload the pool from the statistics store.
    ///
    /// On store failure the pool is left untouched and the error returned.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let records = self.store.get_all().await?;

        let mut incoming = BTreeMap::new();
        let mut malformed = 0;
        for record in &records {
            match record.to_descriptor() {
                Some(proxy) => {
                    incoming.insert(proxy.id, proxy);
                }
                None => {
                    malformed += 1;
                    warn!(
                        proxy_id = record.id,
                        host = %record.host,
                        port = record.port,
                        protocol = %record.protocol,
                        "Skipping malformed proxy record"
                    );
                }
            }
        }

        let mut summary = RefreshSummary {
            malformed,
            ..Default::default()
        };

        let mut state = self.state.lock();
        summary.removed = state
            .proxies
            .keys()
            .filter(|id| !incoming.contains_key(id))
            .copied()
            .collect();
        for id in &summary.removed {
            state.proxies.remove(id);
        }

        for (id, proxy) in incoming {
            if state.proxies.insert(id, proxy).is_some() {
                summary.updated += 1;
            } else {
                summary.added += 1;
            }
        }
        state.last_refresh = Some(Utc::now());
        let total = state.proxies.len();
        drop(state);

        info!(
            total = total,
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed.len(),
            malformed = summary.malformed,
            "Proxy pool refreshed"
        );

        Ok(summary)
    }

    /// Pick the least recently used proxy eligible for `host`
    pub fn select(&self, host: &str) -> Option<ProxyDescriptor> {
        self.select_at(host, Utc::now())
    }

    /// Selection against an explicit clock.
    ///
    /// The chosen proxy's `last_accessed_at` is set to `now` as a soft
    /// reservation; ties are broken by id.
    pub fn select_at(&self, host: &str, now: DateTime<Utc>) -> Option<ProxyDescriptor> {
        let mut state = self.state.lock();
        let proxy = state
            .proxies
            .values_mut()
            .filter(|p| p.is_eligible(host, now))
            .min_by_key(|p| (p.last_accessed_at, p.id))?;

        proxy.last_accessed_at = Some(now);
        debug!(proxy_id = proxy.id, host = %host, "Selected proxy");
        Some(proxy.clone())
    }

    /// Select a proxy for `host` and bind it to the caller's request
    pub fn bind(&self, host: &str) -> Option<RequestBinding> {
        self.select(host).map(|proxy| RequestBinding::new(proxy, host))
    }

    /// Number of proxies that may serve `host` right now
    pub fn available_count(&self, host: &str) -> usize {
        self.available_count_at(host, Utc::now())
    }

    pub fn available_count_at(&self, host: &str, now: DateTime<Utc>) -> usize {
        self.state
            .lock()
            .proxies
            .values()
            .filter(|p| p.is_eligible(host, now))
            .count()
    }

    /// Record the result of one attempt made through `proxy_id`.
    ///
    /// `status` is `None` when the attempt failed before a response arrived.
    /// 2xx and 304 count as success.
    pub fn record_outcome(
        &self,
        proxy_id: i64,
        host: &str,
        status: Option<u16>,
        error: Option<&str>,
    ) {
        let now = Utc::now();
        let success = matches!(status, Some(code) if (200..300).contains(&code) || code == 304);

        let address = {
            let mut state = self.state.lock();
            let Some(proxy) = state.proxies.get_mut(&proxy_id) else {
                debug!(proxy_id, host = %host, "Outcome for proxy no longer in pool");
                return;
            };
            if success {
                proxy.success_count += 1;
            } else {
                proxy.failure_count += 1;
            }
            proxy.last_accessed_at = Some(now);
            proxy.address()
        };

        debug!(proxy_id, host = %host, status = ?status, success, "Recorded proxy outcome");

        let error = error.map(str::to_string);
        self.persist(
            address,
            Box::new(move |record: &mut ProxyUsageRecord| {
                if success {
                    record.success_count += 1;
                } else {
                    record.failure_count += 1;
                }
                record.last_accessed_at = Some(now);
                record.last_status = status.map(i32::from);
                record.last_error = error;
            }),
        );
    }

    /// Keep `proxy_id` away from `host` for `duration` past its current cooldown.
    ///
    /// Returns the new deadline, or `None` if the proxy is not in the pool.
    pub fn cooldown(&self, proxy_id: i64, host: &str, duration: Duration) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let (address, until) = {
            let mut state = self.state.lock();
            let proxy = state.proxies.get_mut(&proxy_id)?;
            let until = extend_cooldown(proxy.cooldowns.get(host).copied(), now, duration);
            proxy.cooldowns.insert(host.to_string(), until);
            (proxy.address(), until)
        };

        info!(proxy_id, host = %host, until = %until, "Proxy cooling down for host");

        let host = host.to_string();
        self.persist(
            address,
            Box::new(move |record: &mut ProxyUsageRecord| {
                let entry = record.cooldowns.0.entry(host).or_insert(until);
                if *entry < until {
                    *entry = until;
                }
            }),
        );

        Some(until)
    }

    /// Exclude `proxy_id` from selection until a refresh re-enables it
    pub fn disable(&self, proxy_id: i64) -> bool {
        let address = {
            let mut state = self.state.lock();
            let Some(proxy) = state.proxies.get_mut(&proxy_id) else {
                return false;
            };
            proxy.available = false;
            proxy.address()
        };

        warn!(proxy_id, address = %address, "Proxy disabled");

        self.persist(address, Box::new(|record: &mut ProxyUsageRecord| {
            record.available = false
        }));
        true
    }

    pub fn get(&self, proxy_id: i64) -> Option<ProxyDescriptor> {
        self.state.lock().proxies.get(&proxy_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<ProxySnapshot> {
        self.state
            .lock()
            .proxies
            .values()
            .map(ProxyDescriptor::snapshot)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_refresh
    }

    /// Round-trip latency to the statistics store
    pub async fn store_health(&self) -> Result<Duration> {
        self.store.health_check().await
    }

    /// Wait for every store write issued so far
    pub async fn flush(&self) {
        self.persist_tasks.close();
        self.persist_tasks.wait().await;
        self.persist_tasks.reopen();
    }

    fn persist(&self, address: String, mutator: StatsMutator) {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!(address = %address, "No runtime available, skipping statistics write");
            return;
        }

        let store = Arc::clone(&self.store);
        self.persist_tasks.spawn(async move {
            match store.patch(&address, mutator).await {
                Ok(true) => {}
                Ok(false) => warn!(address = %address, "Proxy missing from statistics store"),
                Err(e) => warn!(address = %address, error = %e, "Failed to persist proxy statistics"),
            }
        });
    }
}
