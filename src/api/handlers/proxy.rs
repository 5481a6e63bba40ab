//! Proxy pool handlers

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::ScrapeError;

#[derive(Debug, Deserialize)]
pub struct AvailableQuery {
    pub host: String,
}

/// List every proxy in the pool, credentials omitted
pub async fn list_proxies(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pool.snapshot())
}

/// Number of proxies eligible for a destination host right now
pub async fn available(
    State(state): State<AppState>,
    Query(query): Query<AvailableQuery>,
) -> Result<impl IntoResponse, ScrapeError> {
    let host = query.host.trim().to_ascii_lowercase();
    if host.is_empty() {
        return Err(ScrapeError::InvalidRequest("host is required".to_string()));
    }

    let available = state.pool.available_count(&host);
    Ok(Json(json!({
        "host": host,
        "available": available,
    })))
}

/// Reload the pool from the statistics store
pub async fn refresh(State(state): State<AppState>) -> Result<impl IntoResponse, ScrapeError> {
    let summary = state.refresher.refresh_once().await?;
    info!(
        added = summary.added,
        removed = summary.removed.len(),
        "Pool refreshed on request"
    );

    Ok(Json(json!({
        "total": state.pool.len(),
        "summary": summary,
    })))
}
