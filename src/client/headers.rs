//! Browser-like default headers and conditional request headers
//!
//! `Accept-Encoding` is left to the HTTP client, which advertises the codecs
//! it can decode and decompresses transparently.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, IF_MODIFIED_SINCE, REFERER,
    USER_AGENT,
};

use super::transport::OutboundRequest;
use crate::config::ClientConfig;
use crate::error::{Result, ScrapeError};
use crate::models::RequestDescriptor;

pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone)]
pub struct HeaderDefaults {
    pub user_agent: String,
    pub accept_language: String,
    /// Lookback for `If-Modified-Since` when the request sets none
    pub if_modified_since: Option<Duration>,
}

impl HeaderDefaults {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            if_modified_since: config.if_modified_since,
        }
    }
}

/// Format a timestamp as an HTTP date (IMF-fixdate)
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE_FORMAT).to_string()
}

/// Build the wire request: defaults first, then caller headers on top
pub fn build_outbound(
    request: &RequestDescriptor,
    defaults: &HeaderDefaults,
    now: DateTime<Utc>,
) -> Result<OutboundRequest> {
    let mut headers = HeaderMap::new();

    let accept = request.accept.as_deref().unwrap_or(DEFAULT_ACCEPT);
    let navigation = accept.contains("text/html");

    headers.insert(USER_AGENT, header_value(&defaults.user_agent)?);
    headers.insert(ACCEPT, header_value(accept)?);
    headers.insert(ACCEPT_LANGUAGE, header_value(&defaults.accept_language)?);

    let referer = match &request.referer {
        Some(referer) => referer.clone(),
        None => format!("{}/", request.url.origin().ascii_serialization()),
    };
    headers.insert(REFERER, header_value(&referer)?);

    let (dest, mode) = if navigation {
        ("document", "navigate")
    } else {
        ("empty", "cors")
    };
    headers.insert(
        HeaderName::from_static("sec-ch-ua"),
        HeaderValue::from_static(
            "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\"",
        ),
    );
    headers.insert(
        HeaderName::from_static("sec-ch-ua-mobile"),
        HeaderValue::from_static("?0"),
    );
    headers.insert(
        HeaderName::from_static("sec-ch-ua-platform"),
        HeaderValue::from_static("\"Windows\""),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static(dest),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static(mode),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );

    // The configured lookback only applies to GETs (binary downloads included,
    // where a 304 spares the transfer); an explicit date applies to any method.
    let since = request.if_modified_since.or_else(|| {
        defaults
            .if_modified_since
            .filter(|_| request.is_cacheable())
            .and_then(|lookback| chrono::Duration::from_std(lookback).ok())
            .map(|lookback| now - lookback)
    });
    if let Some(since) = since {
        headers.insert(IF_MODIFIED_SINCE, header_value(&http_date(since))?);
    }

    for (name, value) in &request.headers {
        headers.insert(name.clone(), value.clone());
    }

    Ok(OutboundRequest {
        method: request.method.clone(),
        url: request.url.clone(),
        headers,
        body: request.body.clone(),
    })
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ScrapeError::InvalidRequest(format!("invalid header value {:?}: {}", value, e)))
}
