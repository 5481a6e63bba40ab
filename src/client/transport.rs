//! Proxy-aware HTTP transport
//!
//! One `reqwest::Client` per proxy, built lazily and reused so connections
//! to the same proxy are pooled. Requests without a proxy use a dedicated
//! client that ignores system proxy settings.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::header::HeaderMap;
use reqwest::{redirect, Method};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Result, ScrapeError};
use crate::models::{ProxyCredentials, ProxyDescriptor};

const MAX_REDIRECTS: usize = 5;

/// Fully prepared request, headers included
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Response with its body already read
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Deadline elapsed while connecting or reading
    Timeout,
    /// Could not reach the proxy or the destination
    Connect,
    /// Connection dropped mid-exchange
    Reset,
    /// Response body could not be read or decompressed
    Body,
    /// The request itself is unusable (bad proxy URI, invalid header, redirect loop)
    Request,
}

/// Failure before a complete response was received
#[derive(Debug, Clone, Error)]
#[error("{kind:?} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_builder() || err.is_redirect() {
            TransportErrorKind::Request
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Reset
        };

        // Include the root cause; reqwest's own message is often just "error sending request"
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message = format!("{}: {}", message, cause);
            source = cause.source();
        }

        Self { kind, message }
    }
}

/// Sends one attempt, optionally through a proxy
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        request: &OutboundRequest,
        proxy: Option<&ProxyDescriptor>,
    ) -> std::result::Result<TransportResponse, TransportError>;

    /// Release any state held for a proxy that left the pool
    fn forget_proxy(&self, _proxy_id: i64) {}
}

struct ProxyClient {
    uri: String,
    credentials: Option<ProxyCredentials>,
    client: reqwest::Client,
}

impl ProxyClient {
    fn matches(&self, proxy: &ProxyDescriptor) -> bool {
        self.uri == proxy.uri() && self.credentials == proxy.credentials
    }
}

pub struct ReqwestTransport {
    direct: reqwest::Client,
    proxied: DashMap<i64, ProxyClient>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let direct = Self::builder(config.connect_timeout, config.request_timeout)
            .no_proxy()
            .build()
            .map_err(|e| ScrapeError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            direct,
            proxied: DashMap::new(),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        })
    }

    fn builder(connect_timeout: Duration, request_timeout: Duration) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .brotli(true)
            .deflate(true)
    }

    fn client_for(
        &self,
        proxy: Option<&ProxyDescriptor>,
    ) -> std::result::Result<reqwest::Client, TransportError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        if let Some(entry) = self.proxied.get(&proxy.id) {
            if entry.matches(proxy) {
                return Ok(entry.client.clone());
            }
        }

        let mut upstream = reqwest::Proxy::all(proxy.uri())
            .map_err(|e| TransportError::new(TransportErrorKind::Request, e.to_string()))?;
        if let Some(credentials) = &proxy.credentials {
            upstream = upstream.basic_auth(&credentials.username, &credentials.password);
        }

        let client = Self::builder(self.connect_timeout, self.request_timeout)
            .proxy(upstream)
            .build()
            .map_err(|e| TransportError::new(TransportErrorKind::Request, e.to_string()))?;

        debug!(proxy_id = proxy.id, uri = %proxy.uri(), "Built client for proxy");
        self.proxied.insert(
            proxy.id,
            ProxyClient {
                uri: proxy.uri(),
                credentials: proxy.credentials.clone(),
                client: client.clone(),
            },
        );

        Ok(client)
    }

    /// Number of proxies with a cached client
    pub fn cached_clients(&self) -> usize {
        self.proxied.len()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &OutboundRequest,
        proxy: Option<&ProxyDescriptor>,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let client = self.client_for(proxy)?;

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(TransportError::from_reqwest)?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    fn forget_proxy(&self, proxy_id: i64) {
        self.proxied.remove(&proxy_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyUsageRecord;

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(&ClientConfig {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    fn get(url: &str) -> OutboundRequest {
        OutboundRequest {
            method: Method::GET,
            url: Url::parse(url).unwrap(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_direct_send_reads_status_headers_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/market/listings")
            .match_header("x-scrape-run", "1")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>ok</html>")
            .create_async()
            .await;

        let mut request = get(&format!("{}/market/listings", server.url()));
        request.headers.insert("x-scrape-run", "1".parse().unwrap());
        let response = transport().send(&request, None).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.headers["content-type"], "text/html");
        assert_eq!(response.body, Bytes::from_static(b"<html>ok</html>"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_statuses_are_responses_not_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/limited")
            .with_status(429)
            .with_header("retry-after", "120")
            .create_async()
            .await;

        let response = transport()
            .send(&get(&format!("{}/limited", server.url())), None)
            .await
            .unwrap();
        assert_eq!(response.status, 429);
        assert_eq!(response.headers["retry-after"], "120");
    }

    #[tokio::test]
    async fn test_post_body_is_forwarded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api")
            .match_body(r#"{"a":1}"#)
            .with_status(201)
            .create_async()
            .await;

        let mut request = get(&format!("{}/api", server.url()));
        request.method = Method::POST;
        request.body = Some(Bytes::from_static(br#"{"a":1}"#));

        let response = transport().send(&request, None).await.unwrap();
        assert_eq!(response.status, 201);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = transport()
            .send(&get(&format!("http://127.0.0.1:{}/", port)), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Connect);
    }

    #[tokio::test]
    async fn test_proxy_clients_are_cached_and_forgotten() {
        let transport = transport();
        let mut proxy = ProxyUsageRecord::new(1, "10.0.0.1", 8080)
            .to_descriptor()
            .unwrap();

        transport.client_for(Some(&proxy)).unwrap();
        transport.client_for(Some(&proxy)).unwrap();
        assert_eq!(transport.cached_clients(), 1);

        proxy.credentials = Some(ProxyCredentials {
            username: "user".to_string(),
            password: "rotated".to_string(),
        });
        transport.client_for(Some(&proxy)).unwrap();
        assert_eq!(transport.cached_clients(), 1);
        assert!(transport.proxied.get(&1).unwrap().matches(&proxy));

        transport.forget_proxy(1);
        assert_eq!(transport.cached_clients(), 0);

        transport.client_for(None).unwrap();
        assert_eq!(transport.cached_clients(), 0);
    }
}
