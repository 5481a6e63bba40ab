use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the scrapenet client stack
#[derive(Error, Debug)]
pub enum ScrapeError {
    // Request pipeline outcomes
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Rate limited by {host}")]
    RateLimited { host: String },

    #[error("Proxy authentication rejected by proxy {proxy_id}")]
    ProxyAuth { proxy_id: i64 },

    #[error("Upstream reported an error: {message}")]
    UpstreamData {
        code: Option<String>,
        message: String,
    },

    #[error("Request to {url} failed permanently{}", .status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
    PermanentRequest {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Request failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        last: Box<ScrapeError>,
    },

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    // Statistics store
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Cache
    #[error("Cache error: {0}")]
    Cache(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for scrapenet operations
pub type Result<T> = std::result::Result<T, ScrapeError>;

impl ScrapeError {
    /// Whether a request failing with this error may succeed when re-issued.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::TransientNetwork(_)
                | ScrapeError::RateLimited { .. }
                | ScrapeError::ProxyAuth { .. }
                | ScrapeError::Timeout
        )
    }

    /// True for a timeout, including one that exhausted the retry budget.
    pub fn is_timeout(&self) -> bool {
        match self {
            ScrapeError::Timeout => true,
            ScrapeError::ExhaustedRetries { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            ScrapeError::InvalidRequest(_) | ScrapeError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }

            // 429 Too Many Requests
            ScrapeError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 502 Bad Gateway
            ScrapeError::TransientNetwork(_)
            | ScrapeError::ProxyAuth { .. }
            | ScrapeError::UpstreamData { .. }
            | ScrapeError::PermanentRequest { .. }
            | ScrapeError::ExhaustedRetries { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            ScrapeError::DatabaseConnection(_) | ScrapeError::Cancelled => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            ScrapeError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            ScrapeError::Database(_)
            | ScrapeError::Cache(_)
            | ScrapeError::Io(_)
            | ScrapeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<redis::RedisError> for ScrapeError {
    fn from(err: redis::RedisError) -> Self {
        ScrapeError::Cache(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for ScrapeError {
    fn from(err: url::ParseError) -> Self {
        ScrapeError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            ScrapeError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ScrapeError::RateLimited {
                host: "example.com".to_string()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ScrapeError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ScrapeError::ExhaustedRetries {
                attempts: 3,
                last: Box::new(ScrapeError::TransientNetwork("reset".to_string())),
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_retryable_taxonomy() {
        assert!(ScrapeError::TransientNetwork("refused".to_string()).is_retryable());
        assert!(ScrapeError::ProxyAuth { proxy_id: 1 }.is_retryable());
        assert!(ScrapeError::Timeout.is_retryable());
        assert!(!ScrapeError::UpstreamData {
            code: None,
            message: "busy".to_string()
        }
        .is_retryable());
        assert!(!ScrapeError::PermanentRequest {
            url: "https://example.com/".to_string(),
            status: Some(404),
            reason: "Not Found".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_exhausted_timeout_surfaces_as_timeout() {
        let err = ScrapeError::ExhaustedRetries {
            attempts: 3,
            last: Box::new(ScrapeError::Timeout),
        };
        assert!(err.is_timeout());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Request failed after 3 attempts: Request timed out"
        );
    }

    #[test]
    fn test_permanent_request_message() {
        let err = ScrapeError::PermanentRequest {
            url: "https://example.com/a".to_string(),
            status: Some(404),
            reason: "Not Found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Request to https://example.com/a failed permanently with status 404"
        );
    }
}
