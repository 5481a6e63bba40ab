//! Periodic pool refresh service

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

use super::{ProxyPool, RefreshSummary};
use crate::client::HttpTransport;
use crate::error::Result;

/// Re-reads the statistics store on a fixed interval, independent of traffic
pub struct PoolRefreshService {
    pool: Arc<ProxyPool>,
    interval: Duration,
    /// Notified of proxies that left the pool so cached connections are dropped
    transport: Option<Arc<dyn HttpTransport>>,
}

impl PoolRefreshService {
    pub fn new(pool: Arc<ProxyPool>, interval: Duration) -> Self {
        Self {
            pool,
            interval,
            transport: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Run until the shutdown signal flips to `true`
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting pool refresh service (interval: {}s)",
            self.interval.as_secs()
        );

        let mut ticker = interval(self.interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        error!("Pool refresh failed, keeping current pool: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Pool refresh service shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Refresh the pool and release transport state for removed proxies
    pub async fn refresh_once(&self) -> Result<RefreshSummary> {
        let summary = self.pool.refresh().await?;

        if let Some(transport) = &self.transport {
            for id in &summary.removed {
                debug!(proxy_id = id, "Dropping transport for removed proxy");
                transport.forget_proxy(*id);
            }
        }

        Ok(summary)
    }
}

/// Handle for stopping the refresh service
pub struct PoolRefreshHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl PoolRefreshHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for PoolRefreshHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{OutboundRequest, TransportError, TransportResponse};
    use crate::models::{ProxyDescriptor, ProxyUsageRecord};
    use crate::repository::InMemoryProxyStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct ForgetRecorder {
        forgotten: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl HttpTransport for ForgetRecorder {
        async fn send(
            &self,
            _request: &OutboundRequest,
            _proxy: Option<&ProxyDescriptor>,
        ) -> std::result::Result<TransportResponse, TransportError> {
            unreachable!("refresh never sends requests")
        }

        fn forget_proxy(&self, proxy_id: i64) {
            self.forgotten.lock().push(proxy_id);
        }
    }

    fn store() -> Arc<InMemoryProxyStore> {
        Arc::new(InMemoryProxyStore::with_records(vec![
            ProxyUsageRecord::new(1, "10.0.0.1", 8080),
            ProxyUsageRecord::new(2, "10.0.0.2", 8080),
        ]))
    }

    #[tokio::test]
    async fn test_refresh_once_forgets_removed_proxies() {
        let store = store();
        let pool = Arc::new(ProxyPool::new(store.clone(), Duration::from_secs(60)));
        let transport = Arc::new(ForgetRecorder::default());
        let service = PoolRefreshService::new(pool.clone(), Duration::from_secs(60))
            .with_transport(transport.clone());

        service.refresh_once().await.unwrap();
        assert_eq!(pool.len(), 2);

        store.remove(1);
        let summary = service.refresh_once().await.unwrap();
        assert_eq!(summary.removed, vec![1]);
        assert_eq!(*transport.forgotten.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_refreshes_on_interval_and_stops() {
        let store = store();
        let pool = Arc::new(ProxyPool::new(store.clone(), Duration::from_secs(60)));
        let service = PoolRefreshService::new(pool.clone(), Duration::from_secs(300));
        let (handle, shutdown) = PoolRefreshHandle::new();

        let task = tokio::spawn(async move { service.run(shutdown).await });

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(pool.len(), 2);

        handle.shutdown();
        task.await.unwrap();
    }
}
