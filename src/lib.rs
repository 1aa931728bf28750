//! Gatehouse - a configurable HTTP/HTTPS virtual-host gateway.
//!
//! Gatehouse multiplexes any number of virtual hosts onto one HTTP (and
//! optionally one HTTPS) listener. Each virtual host is a set of
//! `"host/path-prefix"` route patterns plus a middleware pipeline composed
//! in a fixed order, so configuration files can list middlewares in any
//! order without changing semantics.
//!
//! # Features
//! - Virtual-host routing: host-specific patterns beat any-host patterns,
//!   longer path prefixes beat shorter ones
//! - Static file serving with optional directory listings
//! - Reverse proxying with `X-Forwarded-*` headers
//! - HTTP Basic authentication
//! - Access logging with daily rotation and configurable line format
//! - Custom error pages
//! - Automatic TLS via ACME (TLS-ALPN-01), gated on explicit consent
//! - Hot reload on SIGUSR1 with leak-free teardown of the previous cycle
//! - systemd socket activation
//!
//! # Quick Example
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = gatehouse::config::load("gatehouse.toml")?;
//! gatehouse::config::ServerConfigValidator::validate(&config)?;
//! let token = CancellationToken::new();
//! gatehouse::adapters::server::run_cycle(&config, &token).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters**
//! (implementations) while keeping pure decisions (pipeline planning, route
//! matching, the task group) inside `core`.
//!
//! # Error Handling
//! Setup-time APIs return `eyre::Result<T>` or a domain specific error
//! type. Per-request failures never escalate past a handler; they become
//! error responses.
pub mod config;
pub mod ports;
pub mod tracing_setup;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::server::run_cycle,
    core::{Route, RouteTable, TaskGroup},
    ports::handler::{BoxHandler, RequestHandler},
};
