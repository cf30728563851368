//! PAMR binary frame serialization and parsing.
//!
//! Every frame starts with a fixed 20-byte big-endian header:
//! `LENGTH i32 | PROTO_ID i32 | MSG_TYPE i32 | MSG_ID i64`, followed by a
//! type-specific body. `LENGTH` counts the whole frame, header included.

use crate::codec::{self, CodecError};
use crate::types::{
    error_code, AgentId, MagicCookie, COOKIE_SIZE, PROTOCOL_VERSION, ROUTER_AGENT_ID,
    UNKNOWN_AGENT_ID,
};
use thiserror::Error;

/// REGISTRATION_REQUEST: agent → router, asks for (or reclaims) an id.
pub const TYPE_REGISTRATION_REQUEST: i32 = 0;
/// REGISTRATION_REPLY: router → agent, grants an id.
pub const TYPE_REGISTRATION_REPLY: i32 = 1;
/// DATA_REQUEST: agent → agent through the router.
pub const TYPE_DATA_REQUEST: i32 = 2;
/// DATA_REPLY: agent → agent through the router, answers a request.
pub const TYPE_DATA_REPLY: i32 = 3;
/// ERROR: router → agent notification.
pub const TYPE_ERROR: i32 = 4;
/// DEBUG: administrative operation.
pub const TYPE_DEBUG: i32 = 5;
/// HEARTBEAT_CLIENT: agent → router liveness answer.
pub const TYPE_HEARTBEAT_CLIENT: i32 = 6;
/// HEARTBEAT_ROUTER: router → agent liveness probe.
pub const TYPE_HEARTBEAT_ROUTER: i32 = 7;

/// Size of the common frame header.
pub const HEADER_SIZE: usize = 20;

const OFF_LENGTH: usize = 0;
const OFF_PROTO: usize = 4;
const OFF_TYPE: usize = 8;
const OFF_MSG_ID: usize = 12;

/// Registration body: agent id, router id, heartbeat period, cookie.
const REGISTRATION_BODY: usize = 8 + 8 + 4 + COOKIE_SIZE;
/// Data body before the payload: source and destination ids.
const DATA_BODY: usize = 8 + 8;
/// Error body: faulty agent, notified agent, error code.
const ERROR_BODY: usize = 8 + 8 + 4;
/// Heartbeat body: heartbeat id, source id.
const HEARTBEAT_BODY: usize = 8 + 8;
/// Debug body: admin cookie, op, target.
const DEBUG_BODY: usize = COOKIE_SIZE + 4 + 8;

/// Kind of error carried by an ERROR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The `sender` of the frame lost its tunnel.
    DisconnectionBroadcast,
    /// The recipient is known but unreachable.
    NotConnectedRecipient,
    /// The recipient is not known by the router.
    UnknownRecipient,
    /// Reconnection with an unknown agent id.
    InvalidAgentId,
    /// Reconnection against another router run.
    InvalidRouterId,
    /// Reconnection with the wrong cookie.
    WrongMagicCookie,
    /// The router failed to decode a frame.
    MalformedMessage,
    /// Admin operation with a bad admin cookie.
    Unauthorized,
}

impl ErrorKind {
    /// Wire code of this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::DisconnectionBroadcast => error_code::DISCONNECTION_BROADCAST,
            Self::NotConnectedRecipient => error_code::NOT_CONNECTED_RCPT,
            Self::UnknownRecipient => error_code::UNKNOWN_RCPT,
            Self::InvalidAgentId => error_code::INVALID_AGENT_ID,
            Self::InvalidRouterId => error_code::INVALID_ROUTER_ID,
            Self::WrongMagicCookie => error_code::WRONG_MAGIC_COOKIE,
            Self::MalformedMessage => error_code::MALFORMED_MESSAGE,
            Self::Unauthorized => error_code::UNAUTHORIZED,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DisconnectionBroadcast => "disconnection_broadcast",
            Self::NotConnectedRecipient => "not_connected_rcpt",
            Self::UnknownRecipient => "unknown_rcpt",
            Self::InvalidAgentId => "invalid_agent_id",
            Self::InvalidRouterId => "invalid_router_id",
            Self::WrongMagicCookie => "wrong_magic_cookie",
            Self::MalformedMessage => "malformed_message",
            Self::Unauthorized => "unauthorized",
        }
    }

    /// Maps a wire code back to a kind.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            error_code::DISCONNECTION_BROADCAST => Some(Self::DisconnectionBroadcast),
            error_code::NOT_CONNECTED_RCPT => Some(Self::NotConnectedRecipient),
            error_code::UNKNOWN_RCPT => Some(Self::UnknownRecipient),
            error_code::INVALID_AGENT_ID => Some(Self::InvalidAgentId),
            error_code::INVALID_ROUTER_ID => Some(Self::InvalidRouterId),
            error_code::WRONG_MAGIC_COOKIE => Some(Self::WrongMagicCookie),
            error_code::MALFORMED_MESSAGE => Some(Self::MalformedMessage),
            error_code::UNAUTHORIZED => Some(Self::Unauthorized),
            _ => None,
        }
    }
}

/// Operation requested by a DEBUG frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugOp {
    /// Echo the frame back.
    Probe,
    /// Close the target agent's tunnel.
    Disconnect,
    /// Re-read the reserved agent configuration.
    Reload,
}

impl DebugOp {
    /// Wire code of this op.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Probe => 0,
            Self::Disconnect => 1,
            Self::Reload => 2,
        }
    }

    /// Maps a wire code back to an op.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Probe),
            1 => Some(Self::Disconnect),
            2 => Some(Self::Reload),
            _ => None,
        }
    }
}

/// A parsed PAMR protocol frame.
///
/// Variants map 1:1 to wire frame types defined by `TYPE_*` constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Agent asks the router for an id, or reclaims a previous one.
    RegistrationRequest {
        /// Correlation token.
        msg_id: i64,
        /// Previously issued id, `None` on first connection.
        agent_id: Option<AgentId>,
        /// Router id learnt earlier, or `DEFAULT_ROUTER_ID`.
        router_id: i64,
        /// Requested heartbeat period in milliseconds.
        heartbeat_period: i32,
        /// Credential guarding the id.
        cookie: MagicCookie,
    },
    /// Router grants an id.
    RegistrationReply {
        /// Correlation token of the request.
        msg_id: i64,
        /// Granted id.
        agent_id: AgentId,
        /// Identity of this router run.
        router_id: i64,
        /// Heartbeat period enforced by the router, in milliseconds.
        heartbeat_period: i32,
        /// Cookie bound to the id.
        cookie: MagicCookie,
    },
    /// Request routed from `src` to `dst`.
    DataRequest {
        /// Correlation token chosen by `src`.
        msg_id: i64,
        /// Sending agent.
        src: AgentId,
        /// Destination agent.
        dst: AgentId,
        /// Opaque payload.
        payload: Vec<u8>,
    },
    /// Reply routed from `src` to `dst`.
    DataReply {
        /// Correlation token of the request being answered.
        msg_id: i64,
        /// Replying agent.
        src: AgentId,
        /// Agent that sent the request.
        dst: AgentId,
        /// Opaque payload.
        payload: Vec<u8>,
    },
    /// Error notification from the router.
    Error {
        /// Correlation token of the message that caused the error.
        msg_id: i64,
        /// What went wrong.
        kind: ErrorKind,
        /// The faulty agent the error is about.
        sender: Option<AgentId>,
        /// The agent being notified.
        recipient: Option<AgentId>,
    },
    /// Administrative operation.
    Debug {
        /// Correlation token.
        msg_id: i64,
        /// Admin credential.
        admin_cookie: MagicCookie,
        /// Requested operation.
        op: DebugOp,
        /// Agent targeted by the operation, if any.
        target: Option<AgentId>,
    },
    /// Agent answers a router heartbeat.
    HeartbeatClient {
        /// Header correlation token.
        msg_id: i64,
        /// Heartbeat being answered.
        heartbeat_id: i64,
        /// Answering agent.
        agent_id: AgentId,
    },
    /// Router probes an agent.
    HeartbeatRouter {
        /// Header correlation token.
        msg_id: i64,
        /// Heartbeat sequence number.
        heartbeat_id: i64,
    },
}

/// Errors that can occur during frame parsing. Any of them means the
/// message is malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer is too short for the header or the declared type.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The LENGTH field disagrees with the buffer.
    #[error("length field says {declared}, buffer holds {actual}")]
    LengthMismatch {
        /// Value of the LENGTH field.
        declared: i32,
        /// Actual byte count received.
        actual: usize,
    },
    /// The frame exceeds the maximum accepted size.
    #[error("frame too large: max {max}, got {actual}")]
    TooLarge {
        /// Maximum allowed frame size.
        max: usize,
        /// Declared frame size.
        actual: usize,
    },
    /// PROTO_ID is not the supported version.
    #[error("unsupported protocol version {0}")]
    BadProtocol(i32),
    /// MSG_TYPE does not match any known frame type.
    #[error("unknown frame type {0}")]
    UnknownType(i32),
    /// An agent id field holds a forbidden value.
    #[error("invalid {field}: {value}")]
    InvalidAgentId {
        /// Name of the offending field.
        field: &'static str,
        /// Raw value found on the wire.
        value: i64,
    },
    /// The heartbeat period is negative.
    #[error("negative heartbeat period {0}")]
    NegativeHeartbeatPeriod(i32),
    /// The error code is not known.
    #[error("unknown error code {0}")]
    UnknownErrorCode(i32),
    /// The debug op is not known.
    #[error("unknown debug op {0}")]
    UnknownDebugOp(i32),
    /// A field could not be read.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Fields shared by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total frame length.
    pub length: i32,
    /// Protocol version.
    pub proto: i32,
    /// Type tag.
    pub msg_type: i32,
    /// Correlation token.
    pub msg_id: i64,
}

impl Header {
    /// Reads the header without validating the body.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooShort`] if `data` is shorter than a header.
    pub fn read(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            length: codec::read_i32(data, OFF_LENGTH)?,
            proto: codec::read_i32(data, OFF_PROTO)?,
            msg_type: codec::read_i32(data, OFF_TYPE)?,
            msg_id: codec::read_i64(data, OFF_MSG_ID)?,
        })
    }
}

fn read_cookie(data: &[u8], offset: usize) -> Result<MagicCookie, FrameError> {
    let raw = data
        .get(offset..offset + COOKIE_SIZE)
        .ok_or(FrameError::TooShort {
            expected: offset + COOKIE_SIZE,
            actual: data.len(),
        })?;
    let mut bytes = [0u8; COOKIE_SIZE];
    bytes.copy_from_slice(raw);
    Ok(MagicCookie::from_bytes(bytes))
}

/// Reads an id that must be non-negative.
fn read_agent_id(data: &[u8], offset: usize, field: &'static str) -> Result<AgentId, FrameError> {
    let value = codec::read_i64(data, offset)?;
    AgentId::new(value).ok_or(FrameError::InvalidAgentId { field, value })
}

/// Reads an id that may also be `UNKNOWN_AGENT_ID`.
fn read_optional_agent_id(
    data: &[u8],
    offset: usize,
    field: &'static str,
) -> Result<Option<AgentId>, FrameError> {
    let value = codec::read_i64(data, offset)?;
    if value == UNKNOWN_AGENT_ID {
        return Ok(None);
    }
    AgentId::new(value)
        .map(Some)
        .ok_or(FrameError::InvalidAgentId { field, value })
}

fn read_heartbeat_period(data: &[u8], offset: usize) -> Result<i32, FrameError> {
    let period = codec::read_i32(data, offset)?;
    if period < 0 {
        return Err(FrameError::NegativeHeartbeatPeriod(period));
    }
    Ok(period)
}

/// Starts a frame buffer with the header; LENGTH is fixed from `body_len`.
fn begin(msg_type: i32, msg_id: i64, body_len: usize) -> Vec<u8> {
    let total = HEADER_SIZE + body_len;
    // Frames never approach 2 GiB: the stream reader caps them far lower.
    let length = i32::try_from(total).unwrap_or(i32::MAX);
    let mut v = Vec::with_capacity(total);
    v.extend_from_slice(&length.to_be_bytes());
    v.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    v.extend_from_slice(&msg_type.to_be_bytes());
    v.extend_from_slice(&msg_id.to_be_bytes());
    v
}

impl Frame {
    /// Creates a first-time `RegistrationRequest`.
    #[must_use]
    pub const fn registration_request(
        msg_id: i64,
        agent_id: Option<AgentId>,
        router_id: i64,
        cookie: MagicCookie,
    ) -> Self {
        Self::RegistrationRequest {
            msg_id,
            agent_id,
            router_id,
            heartbeat_period: 0,
            cookie,
        }
    }

    /// Creates an `Error` frame.
    #[must_use]
    pub const fn error(
        msg_id: i64,
        kind: ErrorKind,
        sender: Option<AgentId>,
        recipient: Option<AgentId>,
    ) -> Self {
        Self::Error {
            msg_id,
            kind,
            sender,
            recipient,
        }
    }

    /// Creates a `HeartbeatRouter` frame; the header id mirrors the heartbeat id.
    #[must_use]
    pub const fn heartbeat_router(heartbeat_id: i64) -> Self {
        Self::HeartbeatRouter {
            msg_id: heartbeat_id,
            heartbeat_id,
        }
    }

    /// Creates the `HeartbeatClient` answering `heartbeat_id`.
    #[must_use]
    pub const fn heartbeat_client(heartbeat_id: i64, agent_id: AgentId) -> Self {
        Self::HeartbeatClient {
            msg_id: heartbeat_id,
            heartbeat_id,
            agent_id,
        }
    }

    /// Correlation token from the header.
    #[must_use]
    pub const fn msg_id(&self) -> i64 {
        match self {
            Self::RegistrationRequest { msg_id, .. }
            | Self::RegistrationReply { msg_id, .. }
            | Self::DataRequest { msg_id, .. }
            | Self::DataReply { msg_id, .. }
            | Self::Error { msg_id, .. }
            | Self::Debug { msg_id, .. }
            | Self::HeartbeatClient { msg_id, .. }
            | Self::HeartbeatRouter { msg_id, .. } => *msg_id,
        }
    }

    /// Returns the wire type tag for this frame.
    ///
    /// # Examples
    ///
    /// ```
    /// use pamr_common::frame::{Frame, TYPE_HEARTBEAT_ROUTER};
    /// assert_eq!(Frame::heartbeat_router(1).frame_type(), TYPE_HEARTBEAT_ROUTER);
    /// ```
    #[must_use]
    pub const fn frame_type(&self) -> i32 {
        match self {
            Self::RegistrationRequest { .. } => TYPE_REGISTRATION_REQUEST,
            Self::RegistrationReply { .. } => TYPE_REGISTRATION_REPLY,
            Self::DataRequest { .. } => TYPE_DATA_REQUEST,
            Self::DataReply { .. } => TYPE_DATA_REPLY,
            Self::Error { .. } => TYPE_ERROR,
            Self::Debug { .. } => TYPE_DEBUG,
            Self::HeartbeatClient { .. } => TYPE_HEARTBEAT_CLIENT,
            Self::HeartbeatRouter { .. } => TYPE_HEARTBEAT_ROUTER,
        }
    }

    /// Serializes this frame into its wire representation.
    ///
    /// # Examples
    ///
    /// ```
    /// use pamr_common::frame::{Frame, HEADER_SIZE};
    /// let bytes = Frame::heartbeat_router(9).serialize();
    /// assert_eq!(bytes.len(), HEADER_SIZE + 16);
    /// assert_eq!(&bytes[..4], &36i32.to_be_bytes());
    /// ```
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Self::RegistrationRequest {
                msg_id,
                agent_id,
                router_id,
                heartbeat_period,
                cookie,
            } => {
                let mut v = begin(TYPE_REGISTRATION_REQUEST, *msg_id, REGISTRATION_BODY);
                v.extend_from_slice(&AgentId::to_wire(*agent_id).to_be_bytes());
                v.extend_from_slice(&router_id.to_be_bytes());
                v.extend_from_slice(&heartbeat_period.to_be_bytes());
                v.extend_from_slice(cookie.as_bytes());
                v
            }
            Self::RegistrationReply {
                msg_id,
                agent_id,
                router_id,
                heartbeat_period,
                cookie,
            } => {
                let mut v = begin(TYPE_REGISTRATION_REPLY, *msg_id, REGISTRATION_BODY);
                v.extend_from_slice(&agent_id.get().to_be_bytes());
                v.extend_from_slice(&router_id.to_be_bytes());
                v.extend_from_slice(&heartbeat_period.to_be_bytes());
                v.extend_from_slice(cookie.as_bytes());
                v
            }
            Self::DataRequest {
                msg_id,
                src,
                dst,
                payload,
            } => Self::serialize_data(TYPE_DATA_REQUEST, *msg_id, *src, *dst, payload),
            Self::DataReply {
                msg_id,
                src,
                dst,
                payload,
            } => Self::serialize_data(TYPE_DATA_REPLY, *msg_id, *src, *dst, payload),
            Self::Error {
                msg_id,
                kind,
                sender,
                recipient,
            } => {
                let mut v = begin(TYPE_ERROR, *msg_id, ERROR_BODY);
                v.extend_from_slice(&AgentId::to_wire(*sender).to_be_bytes());
                v.extend_from_slice(&AgentId::to_wire(*recipient).to_be_bytes());
                v.extend_from_slice(&kind.code().to_be_bytes());
                v
            }
            Self::Debug {
                msg_id,
                admin_cookie,
                op,
                target,
            } => {
                let mut v = begin(TYPE_DEBUG, *msg_id, DEBUG_BODY);
                v.extend_from_slice(admin_cookie.as_bytes());
                v.extend_from_slice(&op.code().to_be_bytes());
                v.extend_from_slice(&AgentId::to_wire(*target).to_be_bytes());
                v
            }
            Self::HeartbeatClient {
                msg_id,
                heartbeat_id,
                agent_id,
            } => {
                let mut v = begin(TYPE_HEARTBEAT_CLIENT, *msg_id, HEARTBEAT_BODY);
                v.extend_from_slice(&heartbeat_id.to_be_bytes());
                v.extend_from_slice(&agent_id.get().to_be_bytes());
                v
            }
            Self::HeartbeatRouter {
                msg_id,
                heartbeat_id,
            } => {
                let mut v = begin(TYPE_HEARTBEAT_ROUTER, *msg_id, HEARTBEAT_BODY);
                v.extend_from_slice(&heartbeat_id.to_be_bytes());
                v.extend_from_slice(&ROUTER_AGENT_ID.to_be_bytes());
                v
            }
        }
    }

    /// Serializes a data frame directly from raw parts.
    ///
    /// Avoids building a `Frame` when the payload is already available as
    /// a slice.
    #[must_use]
    pub fn serialize_data(
        msg_type: i32,
        msg_id: i64,
        src: AgentId,
        dst: AgentId,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut v = begin(msg_type, msg_id, DATA_BODY + payload.len());
        v.extend_from_slice(&src.get().to_be_bytes());
        v.extend_from_slice(&dst.get().to_be_bytes());
        v.extend_from_slice(payload);
        v
    }

    /// Parses one complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the buffer is shorter than a header, the
    /// LENGTH field disagrees with the buffer, the protocol version or type
    /// tag is unknown, or a body field is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use pamr_common::frame::Frame;
    /// let frame = Frame::heartbeat_router(3);
    /// let parsed = Frame::parse(&frame.serialize()).unwrap();
    /// assert_eq!(frame, parsed);
    /// ```
    #[allow(clippy::too_many_lines)]
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        let header = Header::read(data)?;
        if usize::try_from(header.length).ok() != Some(data.len()) {
            return Err(FrameError::LengthMismatch {
                declared: header.length,
                actual: data.len(),
            });
        }
        if header.proto != PROTOCOL_VERSION {
            return Err(FrameError::BadProtocol(header.proto));
        }
        let body_len = match header.msg_type {
            TYPE_REGISTRATION_REQUEST | TYPE_REGISTRATION_REPLY => REGISTRATION_BODY,
            TYPE_DATA_REQUEST | TYPE_DATA_REPLY => DATA_BODY,
            TYPE_ERROR => ERROR_BODY,
            TYPE_DEBUG => DEBUG_BODY,
            TYPE_HEARTBEAT_CLIENT | TYPE_HEARTBEAT_ROUTER => HEARTBEAT_BODY,
            t => return Err(FrameError::UnknownType(t)),
        };
        let min = HEADER_SIZE + body_len;
        if data.len() < min {
            return Err(FrameError::TooShort {
                expected: min,
                actual: data.len(),
            });
        }

        let msg_id = header.msg_id;
        let b = HEADER_SIZE;
        match header.msg_type {
            TYPE_REGISTRATION_REQUEST => Ok(Self::RegistrationRequest {
                msg_id,
                agent_id: read_optional_agent_id(data, b, "agent id")?,
                router_id: codec::read_i64(data, b + 8)?,
                heartbeat_period: read_heartbeat_period(data, b + 16)?,
                cookie: read_cookie(data, b + 20)?,
            }),
            TYPE_REGISTRATION_REPLY => Ok(Self::RegistrationReply {
                msg_id,
                agent_id: read_agent_id(data, b, "agent id")?,
                router_id: codec::read_i64(data, b + 8)?,
                heartbeat_period: read_heartbeat_period(data, b + 16)?,
                cookie: read_cookie(data, b + 20)?,
            }),
            TYPE_DATA_REQUEST | TYPE_DATA_REPLY => {
                let src = read_agent_id(data, b, "source agent id")?;
                let dst = read_agent_id(data, b + 8, "destination agent id")?;
                let payload = data[b + DATA_BODY..].to_vec();
                if header.msg_type == TYPE_DATA_REQUEST {
                    Ok(Self::DataRequest {
                        msg_id,
                        src,
                        dst,
                        payload,
                    })
                } else {
                    Ok(Self::DataReply {
                        msg_id,
                        src,
                        dst,
                        payload,
                    })
                }
            }
            TYPE_ERROR => {
                if data.len() != min {
                    return Err(FrameError::LengthMismatch {
                        declared: header.length,
                        actual: min,
                    });
                }
                let sender = read_optional_agent_id(data, b, "faulty agent id")?;
                let recipient = read_optional_agent_id(data, b + 8, "recipient agent id")?;
                let code = codec::read_i32(data, b + 16)?;
                let kind = ErrorKind::from_code(code).ok_or(FrameError::UnknownErrorCode(code))?;
                Ok(Self::Error {
                    msg_id,
                    kind,
                    sender,
                    recipient,
                })
            }
            TYPE_DEBUG => {
                let admin_cookie = read_cookie(data, b)?;
                let code = codec::read_i32(data, b + COOKIE_SIZE)?;
                let op = DebugOp::from_code(code).ok_or(FrameError::UnknownDebugOp(code))?;
                let target = read_optional_agent_id(data, b + COOKIE_SIZE + 4, "target agent id")?;
                Ok(Self::Debug {
                    msg_id,
                    admin_cookie,
                    op,
                    target,
                })
            }
            TYPE_HEARTBEAT_CLIENT => Ok(Self::HeartbeatClient {
                msg_id,
                heartbeat_id: codec::read_i64(data, b)?,
                agent_id: read_agent_id(data, b + 8, "heartbeat source id")?,
            }),
            TYPE_HEARTBEAT_ROUTER => {
                let heartbeat_id = codec::read_i64(data, b)?;
                let value = codec::read_i64(data, b + 8)?;
                if value != ROUTER_AGENT_ID {
                    return Err(FrameError::InvalidAgentId {
                        field: "heartbeat source id",
                        value,
                    });
                }
                Ok(Self::HeartbeatRouter {
                    msg_id,
                    heartbeat_id,
                })
            }
            t => Err(FrameError::UnknownType(t)),
        }
    }
}
