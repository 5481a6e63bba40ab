use crate::error::{Result, ScrapeError};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default desktop browser user agent sent with every outbound request
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Longest accepted `CACHE_TTL_SECS`
const MAX_CACHE_TTL_SECS: u64 = crate::cache::memory::MAX_CACHE_TTL.as_secs();

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy pool configuration
    pub pool: PoolConfig,
    /// Outbound client configuration
    pub client: ClientConfig,
    /// Response cache configuration
    pub cache: CacheConfig,
    /// Statistics store database configuration
    pub database: DatabaseConfig,
    /// Operator API configuration
    pub api: ApiServerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How often the pool is re-read from the statistics store
    pub refresh_interval: Duration,
    /// Cooldown applied to a proxy for a host that answered 429
    pub rate_limit_cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5 * 60),
            rate_limit_cooldown: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Total tries per logical request (first attempt included)
    pub max_attempts: u32,
    /// Linear backoff step; the n-th retry waits `n * backoff_step`
    pub backoff_step: Duration,
    /// Dial timeout for a single attempt
    pub connect_timeout: Duration,
    /// Deadline for a single attempt, body included
    pub request_timeout: Duration,
    /// Lookback window for `If-Modified-Since`; `None` disables the header
    pub if_modified_since: Option<Duration>,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            if_modified_since: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default time-to-live of cached bodies
    pub ttl: Duration,
    /// Soft capacity of the in-process tier
    pub memory_max_entries: usize,
    /// Redis URL for the distributed tier (empty = process-local only)
    pub redis_url: Option<String>,
    /// Key namespace in the distributed tier
    pub key_prefix: String,
    /// How often expired in-process entries are swept
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            memory_max_entries: 10_000,
            redis_url: None,
            key_prefix: "scrapenet:cache".to_string(),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
    /// How long a query waits for a free connection
    pub acquire_timeout: Duration,
    /// Idle connections are closed after this long
    pub idle_timeout: Duration,
    /// Connections are recycled after this long
    pub max_lifetime: Duration,
    /// Connection attempts at startup before giving up
    pub connect_attempts: u32,
}

impl DatabaseConfig {
    /// Postgres connection URL
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the operator API (default: 8001)
    pub port: u16,
    /// Host to bind to (default: 127.0.0.1)
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let max_attempts: u32 = parse_env("CLIENT_MAX_ATTEMPTS", "3")?;
        if max_attempts == 0 {
            return Err(ScrapeError::InvalidConfig(
                "CLIENT_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }

        let if_modified_since_secs: u64 = parse_env("CLIENT_IF_MODIFIED_SINCE_SECS", "0")?;
        let redis_url = get_env_or("REDIS_URL", "");

        let cache_ttl_secs: u64 = parse_env("CACHE_TTL_SECS", "86400")?;
        if cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ScrapeError::InvalidConfig(format!(
                "CACHE_TTL_SECS must be at most {}",
                MAX_CACHE_TTL_SECS
            )));
        }

        Ok(Config {
            pool: PoolConfig {
                refresh_interval: Duration::from_secs(
                    parse_env::<u64>("POOL_REFRESH_INTERVAL_SECS", "300")?.max(1),
                ),
                rate_limit_cooldown: Duration::from_secs(parse_env(
                    "POOL_RATE_LIMIT_COOLDOWN_SECS",
                    "1800",
                )?),
            },
            client: ClientConfig {
                max_attempts,
                backoff_step: Duration::from_millis(parse_env("CLIENT_BACKOFF_STEP_MS", "1000")?),
                connect_timeout: Duration::from_secs(parse_env(
                    "CLIENT_CONNECT_TIMEOUT_SECS",
                    "10",
                )?),
                request_timeout: Duration::from_secs(parse_env(
                    "CLIENT_REQUEST_TIMEOUT_SECS",
                    "30",
                )?),
                if_modified_since: (if_modified_since_secs > 0)
                    .then(|| Duration::from_secs(if_modified_since_secs)),
                user_agent: get_env_or("CLIENT_USER_AGENT", DEFAULT_USER_AGENT),
            },
            cache: CacheConfig {
                ttl: Duration::from_secs(cache_ttl_secs),
                memory_max_entries: parse_env("CACHE_MEMORY_MAX_ENTRIES", "10000")?,
                redis_url: (!redis_url.trim().is_empty()).then(|| redis_url.trim().to_string()),
                key_prefix: get_env_or("CACHE_KEY_PREFIX", "scrapenet:cache"),
                sweep_interval: Duration::from_secs(
                    parse_env::<u64>("CACHE_SWEEP_INTERVAL_SECS", "300")?.max(1),
                ),
            },
            database: DatabaseConfig {
                host: get_env_or("DB_HOST", "localhost"),
                port: get_env_or("DB_PORT", "5432").parse().map_err(|_| {
                    ScrapeError::InvalidConfig("DB_PORT must be a valid port number".into())
                })?,
                user: get_env_or("DB_USER", "scrapenet"),
                password: get_env_or("DB_PASSWORD", "scrapenet_password"),
                name: get_env_or("DB_NAME", "scrapenet"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: parse_env("DB_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DB_MIN_CONNECTIONS", "1")?,
                acquire_timeout: Duration::from_secs(parse_env("DB_ACQUIRE_TIMEOUT_SECS", "10")?),
                idle_timeout: Duration::from_secs(parse_env("DB_IDLE_TIMEOUT_SECS", "1800")?),
                max_lifetime: Duration::from_secs(parse_env("DB_MAX_LIFETIME_SECS", "3600")?),
                connect_attempts: parse_env::<u32>("DB_CONNECT_ATTEMPTS", "5")?.max(1),
            },
            api: ApiServerConfig {
                port: get_env_or("API_PORT", "8001").parse().map_err(|_| {
                    ScrapeError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "127.0.0.1"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }

    /// Get the operator API address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a numeric environment variable, rejecting malformed values
fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| ScrapeError::InvalidConfig(format!("{} must be a valid number", key)))
}
