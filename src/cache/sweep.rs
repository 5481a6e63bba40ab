//! Periodic sweep of expired in-process cache entries

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, instrument};

use super::ResponseCache;

pub struct CacheSweepService {
    cache: Arc<ResponseCache>,
    interval: Duration,
}

impl CacheSweepService {
    pub fn new(cache: Arc<ResponseCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    /// Run until the shutdown signal flips to `true`
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting cache sweep service (interval: {}s)",
            self.interval.as_secs()
        );

        let mut ticker = interval(self.interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = self.cache.purge_expired();
                    if purged > 0 {
                        debug!(purged, "Swept expired cache entries");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Cache sweep service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping the sweep service
pub struct CacheSweepHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl CacheSweepHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
