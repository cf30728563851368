use pamr_common::io::StreamError;
use pamr_common::{ErrorKind, FrameError};
use thiserror::Error;

/// Errors that can occur during router operation.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame transport error.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
    /// A frame could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(#[from] FrameError),
    /// A registration was refused; the tunnel is closed.
    #[error("registration rejected: {}", .0.name())]
    Rejected(ErrorKind),
    /// A second registration arrived on an already bound tunnel.
    #[error("tunnel already registered as agent {0}")]
    AlreadyRegistered(pamr_common::AgentId),
    /// The dynamic id space is exhausted.
    #[error("no agent id left to allocate")]
    IdsExhausted,
    /// The reserved agent configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The reserved agent configuration is not valid TOML.
    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
    /// An admin request was refused by the router.
    #[error("unauthorized admin operation")]
    Unauthorized,
    /// An admin request did not complete.
    #[error("admin request failed: {0}")]
    Admin(String),
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,
}
