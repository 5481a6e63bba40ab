use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks5" | "socks5h" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Username/password pair for proxies that demand authentication
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Row of the proxy statistics store
#[derive(Clone, PartialEq, FromRow)]
pub struct ProxyUsageRecord {
    pub id: i64,
    pub host: String,
    pub port: i32,
    pub protocol: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cooldowns: Json<HashMap<String, DateTime<Utc>>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub available: bool,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_status: Option<i32>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for ProxyUsageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyUsageRecord")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("cooldowns", &self.cooldowns.0)
            .field("last_accessed_at", &self.last_accessed_at)
            .field("available", &self.available)
            .field("success_count", &self.success_count)
            .field("failure_count", &self.failure_count)
            .field("last_status", &self.last_status)
            .field("last_error", &self.last_error)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl ProxyUsageRecord {
    /// A fresh, available record with no history
    pub fn new(id: i64, host: impl Into<String>, port: i32) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            protocol: ProxyProtocol::Http.as_str().to_string(),
            username: None,
            password: None,
            cooldowns: Json(HashMap::new()),
            last_accessed_at: None,
            available: true,
            success_count: 0,
            failure_count: 0,
            last_status: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Address key used by the store, formatted as `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the in-memory descriptor, or `None` when the record is malformed
    pub fn to_descriptor(&self) -> Option<ProxyDescriptor> {
        let host = self.host.trim();
        if host.is_empty() || self.port <= 0 {
            return None;
        }
        let port = u16::try_from(self.port).ok()?;
        let protocol = ProxyProtocol::from_str(&self.protocol)?;

        let credentials = match (&self.username, &self.password) {
            (Some(username), password) if !username.is_empty() => Some(ProxyCredentials {
                username: username.clone(),
                password: password.clone().unwrap_or_default(),
            }),
            _ => None,
        };

        Some(ProxyDescriptor {
            id: self.id,
            host: host.to_string(),
            port,
            protocol,
            credentials,
            cooldowns: self.cooldowns.0.clone(),
            last_accessed_at: self.last_accessed_at,
            available: self.available,
            success_count: self.success_count,
            failure_count: self.failure_count,
        })
    }
}

/// In-memory view of one upstream proxy
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyDescriptor {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub credentials: Option<ProxyCredentials>,
    /// Destination host -> earliest time this proxy may serve it again
    pub cooldowns: HashMap<String, DateTime<Utc>>,
    /// `None` sorts before any timestamp, so never-used proxies are picked first
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub available: bool,
    pub success_count: i64,
    pub failure_count: i64,
}

impl ProxyDescriptor {
    /// Address key used by the statistics store
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URI without credentials
    pub fn uri(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Whether this proxy may serve `destination_host` at `now`
    pub fn is_eligible(&self, destination_host: &str, now: DateTime<Utc>) -> bool {
        self.available
            && self
                .cooldowns
                .get(destination_host)
                .map_or(true, |until| *until <= now)
    }

    pub fn snapshot(&self) -> ProxySnapshot {
        ProxySnapshot {
            id: self.id,
            address: self.address(),
            protocol: self.protocol.as_str().to_string(),
            authenticated: self.credentials.is_some(),
            cooldowns: self.cooldowns.clone(),
            last_accessed_at: self.last_accessed_at,
            available: self.available,
            success_count: self.success_count,
            failure_count: self.failure_count,
        }
    }
}

/// Serializable proxy state, credentials omitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySnapshot {
    pub id: i64,
    pub address: String,
    pub protocol: String,
    pub authenticated: bool,
    pub cooldowns: HashMap<String, DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub available: bool,
    pub success_count: i64,
    pub failure_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_debug_redacts_password() {
        let mut record = ProxyUsageRecord::new(7, "10.0.0.7", 3128);
        record.username = Some("scraper".to_string());
        record.password = Some("hunter2".to_string());

        let rendered = format!("{:?}", record);
        assert!(rendered.contains("scraper"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("hunter2"));

        let descriptor = record.to_descriptor().unwrap();
        assert!(!format!("{:?}", descriptor).contains("hunter2"));
    }

    #[test]
    fn test_proxy_protocol_parsing() {
        assert_eq!(ProxyProtocol::from_str("HTTP"), Some(ProxyProtocol::Http));
        assert_eq!(ProxyProtocol::from_str("https"), Some(ProxyProtocol::Https));
        assert_eq!(ProxyProtocol::from_str("socks5h"), Some(ProxyProtocol::Socks5));
        assert_eq!(ProxyProtocol::from_str("socks4"), None);
        assert_eq!(ProxyProtocol::Socks5.to_string(), "socks5");
    }

    #[test]
    fn test_record_to_descriptor() {
        let mut record = ProxyUsageRecord::new(7, "10.0.0.1", 3128);
        record.username = Some("user".to_string());
        record.password = Some("pass".to_string());

        let proxy = record.to_descriptor().unwrap();
        assert_eq!(proxy.id, 7);
        assert_eq!(proxy.address(), "10.0.0.1:3128");
        assert_eq!(proxy.uri(), "http://10.0.0.1:3128");
        assert_eq!(
            proxy.credentials,
            Some(ProxyCredentials {
                username: "user".to_string(),
                password: "pass".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_records_are_rejected() {
        assert!(ProxyUsageRecord::new(1, "", 8080).to_descriptor().is_none());
        assert!(ProxyUsageRecord::new(1, "   ", 8080).to_descriptor().is_none());
        assert!(ProxyUsageRecord::new(1, "10.0.0.1", 0).to_descriptor().is_none());
        assert!(ProxyUsageRecord::new(1, "10.0.0.1", -5).to_descriptor().is_none());
        assert!(ProxyUsageRecord::new(1, "10.0.0.1", 70000).to_descriptor().is_none());

        let mut record = ProxyUsageRecord::new(1, "10.0.0.1", 8080);
        record.protocol = "gopher".to_string();
        assert!(record.to_descriptor().is_none());
    }

    #[test]
    fn test_eligibility_respects_cooldown_and_availability() {
        let now = Utc::now();
        let mut proxy = ProxyUsageRecord::new(1, "10.0.0.1", 8080)
            .to_descriptor()
            .unwrap();

        assert!(proxy.is_eligible("example.com", now));

        proxy
            .cooldowns
            .insert("example.com".to_string(), now + Duration::seconds(60));
        assert!(!proxy.is_eligible("example.com", now));
        assert!(proxy.is_eligible("other.com", now));
        assert!(proxy.is_eligible("example.com", now + Duration::seconds(60)));

        proxy.available = false;
        assert!(!proxy.is_eligible("other.com", now));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = ProxyCredentials {
            username: "user".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{:?}", creds);
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_snapshot_omits_credentials() {
        let mut record = ProxyUsageRecord::new(3, "10.0.0.3", 8080);
        record.username = Some("user".to_string());
        record.password = Some("secret".to_string());
        let snapshot = record.to_descriptor().unwrap().snapshot();

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(snapshot.authenticated);
        assert!(!json.contains("secret"));
    }
}
