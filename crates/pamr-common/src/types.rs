//! Core type definitions and protocol constants for PAMR.

use rand::RngCore;
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Wire protocol version carried in every frame header.
pub const PROTOCOL_VERSION: i32 = 2;

/// Default TCP port of the router.
pub const DEFAULT_PORT: u16 = 33647;

/// Router id sent by agents that never registered before.
pub const DEFAULT_ROUTER_ID: i64 = i64::MIN;

/// Wire value meaning "no agent id".
pub const UNKNOWN_AGENT_ID: i64 = -1;

/// Wire value used as the source of router heartbeats.
pub const ROUTER_AGENT_ID: i64 = -53;

/// First id handed out by the router; ids below are reserved.
pub const MIN_DYNAMIC_AGENT_ID: i64 = 4096;

/// Size of a [`MagicCookie`] in bytes.
pub const COOKIE_SIZE: usize = 16;

/// Error codes carried in the payload of ERROR frames.
pub mod error_code {
    /// An agent lost its tunnel; sender field names it.
    pub const DISCONNECTION_BROADCAST: i32 = 0;
    /// Recipient is known but could not be reached.
    pub const NOT_CONNECTED_RCPT: i32 = 1;
    /// Recipient was never registered (or has been evicted).
    pub const UNKNOWN_RCPT: i32 = 2;
    /// Reconnection with an agent id the router does not know.
    pub const INVALID_AGENT_ID: i32 = 3;
    /// Reconnection with a router id from another router run.
    pub const INVALID_ROUTER_ID: i32 = 4;
    /// Reconnection with a cookie that does not match the session.
    pub const WRONG_MAGIC_COOKIE: i32 = 5;
    /// The router could not decode a frame.
    pub const MALFORMED_MESSAGE: i32 = 6;
    /// Admin operation with a bad admin cookie.
    pub const UNAUTHORIZED: i32 = 7;
}

/// Router-issued identifier of an agent. Always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(i64);

impl AgentId {
    /// Wraps a raw id, returning `None` for negative values.
    #[must_use]
    pub const fn new(id: i64) -> Option<Self> {
        if id >= 0 {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Raw wire value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Reserved ids are pre-assigned through the router configuration.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 < MIN_DYNAMIC_AGENT_ID
    }

    /// Wire encoding of an optional id.
    #[must_use]
    pub fn to_wire(id: Option<Self>) -> i64 {
        id.map_or(UNKNOWN_AGENT_ID, Self::get)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: i64 = s
            .trim()
            .parse()
            .map_err(|_| format!("agent id must be an integer, got {s:?}"))?;
        Self::new(raw).ok_or_else(|| format!("agent id must be non-negative, got {raw}"))
    }
}

/// Errors raised while building a [`MagicCookie`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    /// The cookie text is empty.
    #[error("magic cookie must not be empty")]
    Empty,
    /// The cookie text does not fit in [`COOKIE_SIZE`] bytes.
    #[error("magic cookie too long: max {COOKIE_SIZE} bytes, got {0}")]
    TooLong(usize),
}

/// Shared secret proving the right to reuse an agent id.
///
/// Equality is constant-time.
#[derive(Clone, Copy)]
pub struct MagicCookie([u8; COOKIE_SIZE]);

impl MagicCookie {
    /// Draws a random cookie.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; COOKIE_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps raw cookie bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; COOKIE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw cookie bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; COOKIE_SIZE] {
        &self.0
    }
}

impl FromStr for MagicCookie {
    type Err = CookieError;

    /// Up to 16 bytes of UTF-8, zero padded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.as_bytes();
        if raw.is_empty() {
            return Err(CookieError::Empty);
        }
        if raw.len() > COOKIE_SIZE {
            return Err(CookieError::TooLong(raw.len()));
        }
        let mut bytes = [0u8; COOKIE_SIZE];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self(bytes))
    }
}

impl PartialEq for MagicCookie {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for MagicCookie {}

impl fmt::Debug for MagicCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MagicCookie(..)")
    }
}
