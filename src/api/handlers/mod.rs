//! API request handlers

pub mod fetch;
pub mod health;
pub mod proxy;
