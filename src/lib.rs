//! Proxyshim - a signed start/stop endpoint for an on-demand proxy
//!
//! This library provides a small command service that:
//! - Authenticates commands with a timestamped token derived from a shared secret
//! - On start, allocates a public address and launches a proxy workload behind it
//! - On stop, deletes every live workload and then releases every held address
//! - Keeps no state between requests; the provider is queried live each time
//! - Answers every request with a well-formed reply, even after a panic

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod provider;
pub mod server;
