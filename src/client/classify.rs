//! Maps one attempt's result to the action the retry loop takes

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};

use super::transport::{TransportError, TransportErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// 304; terminal, the caller gets no body
    NotModified,
    /// 429; cool the proxy down for the host, then retry
    RateLimited,
    /// 407; disable the proxy, then retry
    AuthStale,
    /// Worth retrying without touching proxy state
    Retryable,
    /// Surfaced immediately
    Permanent,
}

impl Classification {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Classification::RateLimited | Classification::AuthStale | Classification::Retryable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::NotModified => "not_modified",
            Classification::RateLimited => "rate_limited",
            Classification::AuthStale => "auth_stale",
            Classification::Retryable => "retryable",
            Classification::Permanent => "permanent",
        }
    }
}

pub fn classify_status(status: u16) -> Classification {
    match status {
        200..=299 => Classification::Success,
        304 => Classification::NotModified,
        429 => Classification::RateLimited,
        407 => Classification::AuthStale,
        408 | 502 | 504 => Classification::Retryable,
        _ => Classification::Permanent,
    }
}

pub fn classify_transport_error(err: &TransportError) -> Classification {
    match err.kind {
        TransportErrorKind::Timeout
        | TransportErrorKind::Connect
        | TransportErrorKind::Reset
        | TransportErrorKind::Body => Classification::Retryable,
        TransportErrorKind::Request => Classification::Permanent,
    }
}

/// `Retry-After` as a duration, accepting delta-seconds or an HTTP date
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok()
}
