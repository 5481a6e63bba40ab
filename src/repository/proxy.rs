use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::{split_address, ProxyStatsStore, StatsMutator};
use crate::error::Result;
use crate::models::ProxyUsageRecord;

const RECORD_COLUMNS: &str = r#"
    id, host, port, protocol, username, password, cooldowns,
    last_accessed_at, available, success_count, failure_count,
    last_status, last_error, updated_at
"#;

/// Postgres-backed proxy statistics store
#[derive(Clone)]
pub struct ProxyRepository {
    pool: PgPool,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProxyStatsStore for ProxyRepository {
    #[instrument(skip(self))]
    async fn get_all(&self) -> Result<Vec<ProxyUsageRecord>> {
        let records = sqlx::query_as::<_, ProxyUsageRecord>(&format!(
            "SELECT {} FROM proxy_usage ORDER BY id",
            RECORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        debug!(count = records.len(), "Loaded proxy records");
        Ok(records)
    }

    /// Read-modify-write under a row lock so concurrent patches never interleave
    #[instrument(skip(self, mutator))]
    async fn patch(&self, address: &str, mutator: StatsMutator) -> Result<bool> {
        let Some((host, port)) = split_address(address) else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, ProxyUsageRecord>(&format!(
            "SELECT {} FROM proxy_usage WHERE host = $1 AND port = $2 FOR UPDATE",
            RECORD_COLUMNS
        ))
        .bind(host)
        .bind(port)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut record) = current else {
            tx.rollback().await?;
            return Ok(false);
        };

        mutator(&mut record);

        sqlx::query(
            r#"
            UPDATE proxy_usage
            SET cooldowns = $2,
                last_accessed_at = $3,
                available = $4,
                success_count = $5,
                failure_count = $6,
                last_status = $7,
                last_error = $8,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.cooldowns)
        .bind(record.last_accessed_at)
        .bind(record.available)
        .bind(record.success_count)
        .bind(record.failure_count)
        .bind(record.last_status)
        .bind(&record.last_error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn health_check(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(start.elapsed())
    }
}
