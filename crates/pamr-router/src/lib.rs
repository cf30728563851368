//! PAMR router: forwards request/reply messages between agents that
//! cannot reach each other directly.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Admin client for DEBUG operations on a running router.
pub mod admin;
/// CLI argument parsing and router configuration.
pub mod config;
mod connection;
/// Error types for router operations.
pub mod error;
/// Heartbeat and eviction sweeps.
pub mod liveness;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
mod processor;
/// Reserved agent configuration file.
pub mod reserved;
/// Accept loop and shared router state.
pub mod server;
/// Agent sessions and their tunnels.
pub mod session;

pub use server::{run, run_with_shutdown, RouterState};
