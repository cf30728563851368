//! Client side of the admin channel.
//!
//! Admin requests are DEBUG frames sent on a fresh, unregistered tunnel. The
//! router echoes the frame when the operation succeeded.

use crate::error::RouterError;
use pamr_common::io::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
use pamr_common::{AgentId, DebugOp, ErrorKind, Frame, MagicCookie};
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// How long to wait for the router to answer an admin request.
pub const DEFAULT_ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends one admin operation and waits for its acknowledgement.
///
/// # Errors
///
/// Returns [`RouterError::Unauthorized`] if the router refused the cookie,
/// [`RouterError::Admin`] if it reported another error, closed the tunnel or
/// did not answer within `wait`, and [`RouterError::Io`] if it could not be
/// reached.
pub async fn request(
    addr: SocketAddr,
    cookie: MagicCookie,
    op: DebugOp,
    target: Option<AgentId>,
    wait: Duration,
) -> Result<(), RouterError> {
    let mut stream = TcpStream::connect(addr).await?;
    let msg_id: i64 = rand::thread_rng().gen_range(0..i64::MAX);
    let frame = Frame::Debug {
        msg_id,
        admin_cookie: cookie,
        op,
        target,
    };
    write_frame(&mut stream, &frame.serialize()).await?;

    let answer = async {
        loop {
            let raw = match read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE).await {
                Ok(raw) => raw,
                Err(pamr_common::io::StreamError::Closed) => {
                    return Err(RouterError::Admin(
                        "router closed the connection without answering".to_string(),
                    ))
                }
                Err(e) => return Err(e.into()),
            };
            match Frame::parse(&raw)? {
                Frame::Debug { msg_id: id, .. } if id == msg_id => return Ok(()),
                Frame::Error {
                    msg_id: id, kind, ..
                } if id == msg_id => {
                    return Err(match kind {
                        ErrorKind::Unauthorized => RouterError::Unauthorized,
                        other => RouterError::Admin(format!("router answered {}", other.name())),
                    })
                }
                other => {
                    tracing::debug!(frame_type = other.frame_type(), "ignoring unrelated frame");
                }
            }
        }
    };

    timeout(wait, answer)
        .await
        .map_err(|_| RouterError::Admin(format!("no answer within {wait:?}")))?
}

/// Asks the router at `addr` to reload its reserved agent configuration.
///
/// # Errors
///
/// See [`request`].
pub async fn reload(addr: SocketAddr, cookie: MagicCookie) -> Result<(), RouterError> {
    request(addr, cookie, DebugOp::Reload, None, DEFAULT_ADMIN_TIMEOUT).await
}

/// Asks the router at `addr` to drop the tunnel of `agent`.
///
/// # Errors
///
/// See [`request`].
pub async fn disconnect(
    addr: SocketAddr,
    cookie: MagicCookie,
    agent: AgentId,
) -> Result<(), RouterError> {
    request(addr, cookie, DebugOp::Disconnect, Some(agent), DEFAULT_ADMIN_TIMEOUT).await
}
