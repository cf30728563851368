//! Common types and utilities shared across the PAMR router and agents.
//!
//! This crate provides:
//! - Big-endian integer codec ([`codec`])
//! - Binary frame serialization and parsing ([`frame`])
//! - Async frame I/O over byte streams ([`io`])
//! - Identity types and protocol constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod frame;
pub mod io;
pub mod types;

pub use frame::{DebugOp, ErrorKind, Frame, FrameError};
pub use types::{AgentId, MagicCookie};
