//! Health check and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "scrapenet"
        })),
    )
}

/// Pool and cache overview
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let proxies = state.pool.snapshot();
    let enabled = proxies.iter().filter(|p| p.available).count();

    let store = match state.pool.store_health().await {
        Ok(latency) => json!({
            "status": "ok",
            "latency_ms": latency.as_millis() as u64,
        }),
        Err(e) => {
            warn!(error = %e, "Statistics store health check failed");
            json!({ "status": "unreachable" })
        }
    };

    Json(json!({
        "status": "running",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "proxies": {
            "total": proxies.len(),
            "enabled": enabled,
            "last_refresh": state.pool.last_refresh(),
        },
        "store": store,
        "cache": {
            "memory_entries": state.cache.memory_len(),
        },
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::api::server::test_support::{state_with, CannedTransport};
    use crate::models::ProxyUsageRecord;

    async fn get_json(uri: &str) -> (axum::http::StatusCode, serde_json::Value) {
        get_json_with(uri, false).await
    }

    async fn get_json_with(
        uri: &str,
        store_down: bool,
    ) -> (axum::http::StatusCode, serde_json::Value) {
        let mut disabled = ProxyUsageRecord::new(2, "10.0.0.2", 8080);
        disabled.available = false;
        let (store, state) = state_with(
            vec![ProxyUsageRecord::new(1, "10.0.0.1", 8080), disabled],
            Arc::new(CannedTransport::default()),
        )
        .await;
        store.set_unreachable(store_down);

        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "scrapenet");
    }

    #[tokio::test]
    async fn test_status_reports_pool() {
        let (status, body) = get_json("/api/status").await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(body["proxies"]["total"], 2);
        assert_eq!(body["proxies"]["enabled"], 1);
        assert!(body["proxies"]["last_refresh"].is_string());
        assert_eq!(body["cache"]["memory_entries"], 0);
        assert_eq!(body["store"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_reports_unreachable_store() {
        let (status, body) = get_json_with("/api/status", true).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(body["store"]["status"], "unreachable");
        assert_eq!(body["proxies"]["total"], 2);
    }
}
