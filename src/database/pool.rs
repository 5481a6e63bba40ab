//! Postgres connection pool backing the proxy statistics store

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::{Result, ScrapeError};
use crate::repository::ProxyRepository;

/// Wait before the n-th reconnect is `n * CONNECT_RETRY_STEP`
const CONNECT_RETRY_STEP: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the statistics store, retrying while the server comes up.
    ///
    /// Gives up with `DatabaseConnection` after `connect_attempts` failures.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime);
        let url = config.url();

        let mut attempt: u32 = 1;
        loop {
            info!(
                host = %config.host,
                port = config.port,
                database = %config.name,
                attempt,
                "Connecting to statistics store"
            );

            match options.clone().connect(&url).await {
                Ok(pool) => {
                    info!("Statistics store connected");
                    return Ok(Self { pool });
                }
                Err(e) if attempt < config.connect_attempts => {
                    warn!(attempt, error = %e, "Statistics store not reachable, retrying");
                    tokio::time::sleep(CONNECT_RETRY_STEP * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(ScrapeError::DatabaseConnection(e.to_string())),
            }
        }
    }

    /// Proxy statistics store over this pool
    pub fn proxy_store(&self) -> ProxyRepository {
        ProxyRepository::new(self.pool.clone())
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        super::migrations::run_migrations(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Close the pool once pending statistics writes have been flushed
    pub async fn close(&self) {
        info!("Closing statistics store pool");
        self.pool.close().await;
    }
}
