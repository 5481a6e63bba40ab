//! Postgres connection pool and schema for the proxy statistics store

pub mod migrations;
pub mod pool;

pub use pool::Database;
