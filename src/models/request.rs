use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use url::Url;

use crate::error::{Result, ScrapeError};

/// Outbound request description handed to the resilient client
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: Url,
    /// Page that would naturally have issued this request
    pub referer: Option<String>,
    /// Overrides the default `Accept` header
    pub accept: Option<String>,
    /// Explicit `If-Modified-Since`; takes precedence over the configured lookback
    pub if_modified_since: Option<DateTime<Utc>>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ScrapeError::InvalidRequest(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ScrapeError::InvalidRequest(format!(
                "missing host in {}",
                url
            )));
        }

        Ok(Self {
            method,
            url,
            referer: None,
            accept: None,
            if_modified_since: None,
            headers: HeaderMap::new(),
            body: None,
        })
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    /// POST request carrying `payload` serialized as JSON
    pub fn post_json<B: Serialize + ?Sized>(url: &str, payload: &B) -> Result<Self> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| ScrapeError::InvalidRequest(format!("unserializable body: {}", e)))?;
        let mut request = Self::new(Method::POST, url)?;
        request.headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        request.body = Some(Bytes::from(body));
        Ok(request)
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn with_if_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.if_modified_since = Some(since);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ScrapeError::InvalidRequest(format!("bad header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ScrapeError::InvalidRequest(format!("bad header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Destination host, lower-cased; the key of per-proxy cooldowns
    pub fn host(&self) -> String {
        self.url
            .host_str()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    /// Only idempotent requests may be served from or written to the cache
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET
    }
}

/// Terminal result of a request that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    Fetched(T),
    /// Upstream answered 304 for a conditional request
    NotModified,
}

impl<T> FetchOutcome<T> {
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> FetchOutcome<U> {
        match self {
            FetchOutcome::Fetched(value) => FetchOutcome::Fetched(f(value)),
            FetchOutcome::NotModified => FetchOutcome::NotModified,
        }
    }

    pub fn fetched(self) -> Option<T> {
        match self {
            FetchOutcome::Fetched(value) => Some(value),
            FetchOutcome::NotModified => None,
        }
    }

    pub fn is_not_modified(&self) -> bool {
        matches!(self, FetchOutcome::NotModified)
    }
}

/// Downloaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPayload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}
