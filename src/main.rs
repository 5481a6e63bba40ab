//! Scrapenet daemon - entry point
//!
//! Loads the proxy pool, keeps it refreshed and serves the operator API with
//! graceful shutdown support.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scrapenet::api::{ApiServer, AppState};
use scrapenet::cache::{CacheSweepHandle, CacheSweepService, MemoryCache, RedisCache, ResponseCache};
use scrapenet::client::{HttpTransport, ReqwestTransport, ResilientClient};
use scrapenet::config::{CacheConfig, Config, LogConfig};
use scrapenet::database::Database;
use scrapenet::pool::{PoolRefreshHandle, PoolRefreshService, ProxyPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log);

    info!("Starting scrapenet");

    // Statistics store
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    info!("Database ready");

    // Proxy pool; an unreachable store at startup leaves it empty (direct mode)
    let store = Arc::new(db.proxy_store());
    let pool = Arc::new(ProxyPool::new(store, config.pool.rate_limit_cooldown));
    match pool.refresh().await {
        Ok(summary) => info!("Loaded {} proxies", summary.added),
        Err(e) => warn!("Initial pool refresh failed, starting empty: {}", e),
    }

    let cache = Arc::new(build_cache(&config.cache).await);

    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config.client)?);
    let client = ResilientClient::new(pool.clone(), cache.clone(), transport.clone(), &config.client);

    // Background refresh
    let refresher = Arc::new(
        PoolRefreshService::new(pool.clone(), config.pool.refresh_interval)
            .with_transport(transport),
    );
    let (refresh_handle, refresh_shutdown) = PoolRefreshHandle::new();
    let refresh_service = refresher.clone();
    let refresh_task = tokio::spawn(async move {
        refresh_service.run(refresh_shutdown).await;
    });

    // Expired cache entries
    let sweeper = CacheSweepService::new(cache.clone(), config.cache.sweep_interval);
    let (sweep_handle, sweep_shutdown) = CacheSweepHandle::new();
    let sweep_task = tokio::spawn(async move {
        sweeper.run(sweep_shutdown).await;
    });

    // Operator API
    let (shutdown_tx, _) = tokio::sync::watch::channel(false);
    let api_server = ApiServer::new(
        config.api.clone(),
        AppState::new(pool.clone(), refresher, cache.clone(), client.clone()),
    );
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("API listening on {}", config.api_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    client.cancellation_token().cancel();
    let _ = shutdown_tx.send(true);
    refresh_handle.shutdown();
    sweep_handle.shutdown();

    let _ = tokio::join!(api_task, refresh_task, sweep_task);

    // Let pending statistics writes land before the pool closes
    pool.flush().await;
    db.close().await;

    info!("scrapenet stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("scrapenet={},tower_http=info", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

async fn build_cache(config: &CacheConfig) -> ResponseCache {
    let memory = MemoryCache::new(config.memory_max_entries);

    if let Some(url) = &config.redis_url {
        match RedisCache::connect(url, config.key_prefix.clone()).await {
            Ok(redis) => return ResponseCache::new(memory, Arc::new(redis), config.ttl),
            Err(e) => warn!("Redis unavailable, caching in process only: {}", e),
        }
    }

    ResponseCache::in_memory(config.memory_max_entries, config.ttl)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
