//! Resilient HTTP client
//!
//! Every operation runs the same pipeline: consult the cache, bind a proxy
//! (or go direct when none is eligible), send, classify, feed the outcome
//! back into the pool, retry within policy, decode, and cache the body.

pub mod classify;
pub mod headers;
pub mod retry;
pub mod transport;

pub use classify::{classify_status, classify_transport_error, retry_after, Classification};
pub use headers::{build_outbound, HeaderDefaults};
pub use retry::{RetryContext, RetryPolicy};
pub use transport::{
    HttpTransport, OutboundRequest, ReqwestTransport, TransportError, TransportErrorKind,
    TransportResponse,
};

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use quick_xml::events::Event;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{cache_key, redact_url, ResponseCache};
use crate::config::ClientConfig;
use crate::error::{Result, ScrapeError};
use crate::models::{BinaryPayload, FetchOutcome, RequestDescriptor};
use crate::pool::{ProxyPool, RequestBinding};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Well-formed error document some upstreams return with a 200 status
#[derive(Debug, Deserialize)]
#[serde(rename = "error")]
struct UpstreamErrorEnvelope {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Clone)]
pub struct ResilientClient {
    pool: Arc<ProxyPool>,
    cache: Arc<ResponseCache>,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    headers: HeaderDefaults,
    cancel: CancellationToken,
}

impl ResilientClient {
    pub fn new(
        pool: Arc<ProxyPool>,
        cache: Arc<ResponseCache>,
        transport: Arc<dyn HttpTransport>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            transport,
            policy: RetryPolicy::from_config(config),
            headers: HeaderDefaults::from_config(config),
            cancel: CancellationToken::new(),
        }
    }

    /// A client whose requests stop once `token` is cancelled.
    ///
    /// No new attempt starts after cancellation is observed, and in-flight
    /// sends and backoff waits are abandoned.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub async fn get_text(
        &self,
        request: &RequestDescriptor,
        use_cache: bool,
    ) -> Result<FetchOutcome<String>> {
        self.get_decoded(request, use_cache, |body| Ok(decode_text(body)))
            .await
    }

    pub async fn get_binary(&self, request: &RequestDescriptor) -> Result<FetchOutcome<BinaryPayload>> {
        let response = match self.execute(request).await? {
            FetchOutcome::Fetched(response) => response,
            FetchOutcome::NotModified => return Ok(FetchOutcome::NotModified),
        };

        Ok(FetchOutcome::Fetched(BinaryPayload {
            name: binary_name(&response.headers, &request.url),
            mime_type: mime_type(&response.headers),
            bytes: response.body,
        }))
    }

    /// Fetch and parse an HTML document
    pub async fn get_html(
        &self,
        request: &RequestDescriptor,
        use_cache: bool,
    ) -> Result<FetchOutcome<scraper::Html>> {
        let text = self.get_text(request, use_cache).await?;
        Ok(text.map(|text| scraper::Html::parse_document(&text)))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        use_cache: bool,
    ) -> Result<FetchOutcome<T>> {
        let url = redact_url(&request.url);
        self.get_decoded(request, use_cache, |body| decode_json(body, &url))
            .await
    }

    /// Fetch and deserialize XML, recognising upstream error documents
    pub async fn get_xml<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        use_cache: bool,
    ) -> Result<FetchOutcome<T>> {
        let url = redact_url(&request.url);
        self.get_decoded(request, use_cache, |body| decode_xml(body, &url))
            .await
    }

    /// Send a JSON request and deserialize the JSON answer; never cached
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
    ) -> Result<FetchOutcome<T>> {
        let url = redact_url(&request.url);
        self.get_decoded(request, false, |body| decode_json(body, &url))
            .await
    }

    async fn get_decoded<T, F>(
        &self,
        request: &RequestDescriptor,
        use_cache: bool,
        decode: F,
    ) -> Result<FetchOutcome<T>>
    where
        F: Fn(&Bytes) -> Result<T>,
    {
        let key = (use_cache && request.is_cacheable()).then(|| cache_key(&request.url));

        if let Some(key) = &key {
            if let Some(body) = self.cache.get(key).await {
                match decode(&body) {
                    Ok(value) => return Ok(FetchOutcome::Fetched(value)),
                    Err(e) => debug!(key = %key, error = %e, "Cached body no longer decodes, refetching"),
                }
            }
        }

        let response = match self.execute(request).await? {
            FetchOutcome::Fetched(response) => response,
            FetchOutcome::NotModified => return Ok(FetchOutcome::NotModified),
        };

        let value = decode(&response.body)?;

        if let Some(key) = key {
            self.cache
                .set(&key, response.body, self.cache.default_ttl())
                .await;
        }

        Ok(FetchOutcome::Fetched(value))
    }

    /// Run the retry loop for one logical request and return the raw response
    #[instrument(
        skip(self, request),
        fields(
            request_id = %Uuid::new_v4(),
            method = %request.method,
            url = %redact_url(&request.url),
        )
    )]
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<FetchOutcome<TransportResponse>> {
        let host = request.host();
        let url = redact_url(&request.url);
        let mut context = self.policy.context();
        let mut last_error = None;

        while context.should_retry() {
            if self.cancel.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }

            let outbound = build_outbound(request, &self.headers, Utc::now())?;

            let binding = self.pool.bind(&host);
            if binding.is_none() {
                warn!(host = %host, "No proxy available for host, sending direct");
            }
            let proxy = binding.as_ref().map(RequestBinding::proxy);

            debug!(
                attempt = context.attempt + 1,
                max_attempts = context.max_attempts,
                proxy_id = ?proxy.map(|p| p.id),
                "Sending request"
            );

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ScrapeError::Cancelled),
                result = self.transport.send(&outbound, proxy) => result,
            };

            let classification = match &result {
                Ok(response) => classify_status(response.status),
                Err(e) => classify_transport_error(e),
            };
            context.record(classification);
            debug!(
                attempt = context.attempt,
                classification = classification.as_str(),
                "Attempt classified"
            );

            let proxy_id = binding.as_ref().map(RequestBinding::proxy_id);
            let proxied = proxy_id.is_some();
            if let Some(binding) = binding {
                self.settle(binding, classification, &result);
            }

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    let err = transport_failure(e, &url);
                    if classification == Classification::Permanent {
                        return Err(err);
                    }
                    warn!(
                        attempt = context.attempt,
                        classification = classification.as_str(),
                        error = %err,
                        "Attempt failed"
                    );
                    last_error = Some(err);
                    self.backoff(&context, proxied).await?;
                    continue;
                }
            };

            match classification {
                Classification::Success => return Ok(FetchOutcome::Fetched(response)),
                Classification::NotModified => return Ok(FetchOutcome::NotModified),
                Classification::Permanent => {
                    return Err(ScrapeError::PermanentRequest {
                        url,
                        status: Some(response.status),
                        reason: status_reason(response.status),
                    })
                }
                Classification::RateLimited => {
                    warn!(attempt = context.attempt, host = %host, "Rate limited");
                    last_error = Some(ScrapeError::RateLimited { host: host.clone() });
                }
                Classification::AuthStale => {
                    warn!(attempt = context.attempt, "Proxy authentication rejected");
                    last_error = Some(match proxy_id {
                        Some(proxy_id) => ScrapeError::ProxyAuth { proxy_id },
                        None => ScrapeError::TransientNetwork(format!(
                            "{} demanded proxy authentication",
                            url
                        )),
                    });
                }
                Classification::Retryable => {
                    warn!(attempt = context.attempt, status = response.status, "Retryable status");
                    last_error = Some(ScrapeError::TransientNetwork(format!(
                        "{} answered {}",
                        url, response.status
                    )));
                }
            }

            self.backoff(&context, proxied).await?;
        }

        let last = last_error.unwrap_or_else(|| ScrapeError::Internal("no attempt was made".into()));
        info!(attempts = context.attempt, error = %last, "Retries exhausted");
        Err(ScrapeError::ExhaustedRetries {
            attempts: context.attempt,
            last: Box::new(last),
        })
    }

    /// Attribute an attempt to its proxy and apply the classification's side effects
    fn settle(
        &self,
        binding: RequestBinding,
        classification: Classification,
        result: &std::result::Result<TransportResponse, TransportError>,
    ) {
        let proxy_id = binding.proxy_id();
        let host = binding.host();

        match result {
            Ok(response) => self
                .pool
                .record_outcome(proxy_id, host, Some(response.status), None),
            Err(e) => self
                .pool
                .record_outcome(proxy_id, host, None, Some(&e.to_string())),
        }

        match classification {
            Classification::RateLimited => {
                let hinted = result
                    .as_ref()
                    .ok()
                    .and_then(|r| retry_after(&r.headers, Utc::now()));
                let cooldown = hinted
                    .map_or(self.pool.rate_limit_cooldown(), |d| {
                        d.max(self.pool.rate_limit_cooldown())
                    });
                self.pool.cooldown(proxy_id, host, cooldown);
            }
            Classification::AuthStale => {
                self.pool.disable(proxy_id);
            }
            _ => {}
        }

        binding.settle();
    }

    async fn backoff(&self, context: &RetryContext, proxied: bool) -> Result<()> {
        if !context.should_retry() {
            return Ok(());
        }

        let delay = self.policy.backoff_delay(context, proxied);
        if delay.is_zero() {
            return Ok(());
        }

        debug!(delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScrapeError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn transport_failure(err: TransportError, url: &str) -> ScrapeError {
    match err.kind {
        TransportErrorKind::Timeout => ScrapeError::Timeout,
        TransportErrorKind::Request => ScrapeError::PermanentRequest {
            url: url.to_string(),
            status: None,
            reason: err.message,
        },
        _ => ScrapeError::TransientNetwork(err.to_string()),
    }
}

fn status_reason(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown status")
        .to_string()
}

/// Body as text, without the trailing NUL bytes some upstreams append
fn decode_text(body: &Bytes) -> String {
    String::from_utf8_lossy(body)
        .trim_end_matches('\0')
        .to_string()
}

fn decode_json<T: DeserializeOwned>(body: &Bytes, url: &str) -> Result<T> {
    serde_json::from_str(&decode_text(body)).map_err(|e| ScrapeError::PermanentRequest {
        url: url.to_string(),
        status: None,
        reason: format!("invalid JSON: {}", e),
    })
}

fn decode_xml<T: DeserializeOwned>(body: &Bytes, url: &str) -> Result<T> {
    let text = decode_text(body);
    match quick_xml::de::from_str::<T>(&text) {
        Ok(value) => Ok(value),
        Err(e) => match xml_root_is(&text, b"error")
            .then(|| quick_xml::de::from_str::<UpstreamErrorEnvelope>(&text))
        {
            Some(Ok(envelope)) => Err(ScrapeError::UpstreamData {
                code: envelope.code,
                message: envelope.message,
            }),
            _ => Err(ScrapeError::PermanentRequest {
                url: url.to_string(),
                status: None,
                reason: format!("invalid XML: {}", e),
            }),
        },
    }
}

/// Whether the document's root element has the given local name
fn xml_root_is(text: &str, name: &[u8]) -> bool {
    let mut reader = quick_xml::Reader::from_str(text);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => return e.local_name().as_ref() == name,
            Ok(Event::Eof) | Err(_) => return false,
            Ok(_) => {}
        }
    }
}

fn binary_name(headers: &HeaderMap, url: &url::Url) -> String {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(disposition_filename)
        .or_else(|| {
            url.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "download".to_string())
}

fn disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';') {
        let Some((name, raw)) = part.trim().split_once('=') else {
            continue;
        };
        let raw = raw.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            // RFC 5987: charset'language'percent-encoded
            "filename*" => {
                let encoded = raw.rsplit('\'').next()?;
                let (decoded, _) = url::form_urlencoded::parse(encoded.as_bytes()).next()?;
                if !decoded.is_empty() {
                    return Some(decoded.into_owned());
                }
            }
            "filename" => {
                let name = raw.trim_matches('"');
                if !name.is_empty() {
                    plain = Some(name.to_string());
                }
            }
            _ => {}
        }
    }
    plain
}

fn mime_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|essence| !essence.is_empty())
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}
