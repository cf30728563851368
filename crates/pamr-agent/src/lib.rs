//! PAMR agent library: registers with a router, keeps the tunnel alive and
//! exchanges request/reply messages with other agents.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod agent;
/// Exponential backoff with jitter for reconnection.
pub mod backoff;
/// Agent configuration.
pub mod config;
/// Error types for agent operations.
pub mod error;
/// Application callback for incoming requests.
pub mod handler;
mod tunnel;
/// Correlation of outstanding requests with their replies.
pub mod waiting_room;

pub use agent::Agent;
pub use config::{AgentConfig, ReconnectConfig};
pub use error::AgentError;
pub use handler::{Echo, Ignore, MessageHandler, Request};
pub use tunnel::ConnStatus;
