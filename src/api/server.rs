//! API server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::cache::ResponseCache;
use crate::client::ResilientClient;
use crate::config::ApiServerConfig;
use crate::error::{Result, ScrapeError};
use crate::pool::{PoolRefreshService, ProxyPool};

use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ProxyPool>,
    pub refresher: Arc<PoolRefreshService>,
    pub cache: Arc<ResponseCache>,
    pub client: ResilientClient,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        pool: Arc<ProxyPool>,
        refresher: Arc<PoolRefreshService>,
        cache: Arc<ResponseCache>,
        client: ResilientClient,
    ) -> Self {
        Self {
            pool,
            refresher,
            cache,
            client,
            started_at: Instant::now(),
        }
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Run the API server until the shutdown signal fires
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| ScrapeError::InvalidConfig(format!("invalid API address: {}", e)))?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| ScrapeError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
