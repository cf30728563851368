use pamr_common::io::StreamError;
use pamr_common::{AgentId, ErrorKind, FrameError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the agent library.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame transport error.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
    /// The router sent a frame that could not be decoded.
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    /// The router refused the registration.
    #[error("registration rejected: {}", .0.name())]
    Rejected(ErrorKind),
    /// No registration reply arrived in time.
    #[error("registration timed out")]
    HandshakeTimeout,
    /// The router answered the registration with an unexpected frame.
    #[error("unexpected frame type {0} during registration")]
    UnexpectedFrame(i32),
    /// The destination lost its tunnel while a reply was awaited.
    #[error("remote agent {0} disconnected")]
    RemoteDisconnected(AgentId),
    /// The destination is known to the router but not reachable.
    #[error("agent {0} is not connected")]
    NotConnected(AgentId),
    /// The destination was never registered or has been evicted.
    #[error("unknown agent {0}")]
    UnknownRecipient(AgentId),
    /// The router could not decode the request.
    #[error("router reported a malformed message")]
    MalformedMessage,
    /// The tunnel broke before the reply arrived.
    #[error("tunnel failure")]
    TunnelFailure,
    /// Nothing was heard from the router for longer than the heartbeat period.
    #[error("router silent for {0:?}")]
    RouterSilent(Duration),
    /// The agent was shut down.
    #[error("agent stopped")]
    Stopped,
    /// The agent configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AgentError {
    /// Registration errors that retrying with the same identity cannot fix.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Rejected(
                ErrorKind::InvalidAgentId | ErrorKind::InvalidRouterId | ErrorKind::WrongMagicCookie
            ) | Self::Config(_)
        )
    }
}
