//! Operator API
//!
//! Read-mostly HTTP endpoints for inspecting the proxy pool and cache, plus
//! an on-demand refresh and a debug fetch through the resilient client.

pub mod handlers;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
