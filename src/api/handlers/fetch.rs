//! Debug fetch through the resilient client

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::api::server::AppState;
use crate::cache::redact_url;
use crate::error::ScrapeError;
use crate::models::{FetchOutcome, RequestDescriptor};

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub use_cache: bool,
    pub referer: Option<String>,
}

/// GET `url` as text exactly as a scraper would
pub async fn fetch(
    State(state): State<AppState>,
    Json(req): Json<FetchRequest>,
) -> Result<impl IntoResponse, ScrapeError> {
    let mut request = RequestDescriptor::get(&req.url)?;
    if let Some(referer) = req.referer {
        request = request.with_referer(referer);
    }

    let outcome = state.client.get_text(&request, req.use_cache).await?;
    let url = redact_url(&request.url);

    Ok(Json(match outcome {
        FetchOutcome::Fetched(body) => json!({
            "url": url,
            "not_modified": false,
            "length": body.len(),
            "body": body,
        }),
        FetchOutcome::NotModified => json!({
            "url": url,
            "not_modified": true,
        }),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::api::server::test_support::{state_with, CannedTransport};
    use crate::client::TransportResponse;
    use crate::models::ProxyUsageRecord;

    async fn post_fetch(transport: Arc<CannedTransport>, payload: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let (_, state) = state_with(
            vec![ProxyUsageRecord::new(1, "10.0.0.1", 8080)],
            transport,
        )
        .await;

        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/fetch")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let transport = Arc::new(CannedTransport::default());
        transport
            .responses
            .lock()
            .push_back(TransportResponse::new(200, "<html>listing</html>\0"));

        let (status, body) = post_fetch(
            transport,
            serde_json::json!({"url": "https://example.com/market?key=abc"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["body"], "<html>listing</html>");
        assert_eq!(body["url"], "https://example.com/market?key=REDACTED");
    }

    #[tokio::test]
    async fn test_fetch_maps_errors_to_status() {
        let transport = Arc::new(CannedTransport::default());
        transport
            .responses
            .lock()
            .push_back(TransportResponse::new(404, ""));

        let (status, body) = post_fetch(
            transport,
            serde_json::json!({"url": "https://example.com/missing"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("404"));

        let (status, _) = post_fetch(
            Arc::new(CannedTransport::default()),
            serde_json::json!({"url": "ftp://example.com/"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
