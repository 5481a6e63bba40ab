//! Scrapenet - proxy-pooled resilient HTTP client
//!
//! Network access layer for scraping a marketplace at scale behind a pool of
//! upstream proxies.
//!
//! ## Features
//!
//! - Least-recently-used proxy selection with per-host cooldowns
//! - Outcome feedback into a shared statistics store (Postgres)
//! - Status classification with bounded, cancellable retries
//! - Two-tier response cache (process memory + Redis)
//! - Text, binary, HTML, XML and JSON operations with browser-like headers
//! - Small operator API for inspecting and refreshing the pool

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod pool;
pub mod repository;

pub use cache::ResponseCache;
pub use client::ResilientClient;
pub use config::Config;
pub use database::Database;
pub use error::{Result, ScrapeError};
pub use pool::ProxyPool;
