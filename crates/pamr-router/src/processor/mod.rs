//! Per-frame processing, dispatched on the decoded frame type.
//!
//! Processors never block: every send is a non-blocking enqueue on a
//! tunnel's outbound queue.

mod data;
mod debug;
mod heartbeat;
mod registration;

use crate::error::RouterError;
use crate::metrics::counters;
use crate::server::RouterState;
use crate::session::Attachment;
use pamr_common::frame::{ErrorKind, Header};
use pamr_common::Frame;
use std::sync::Arc;

/// Decodes `raw` and runs the matching processor.
///
/// An `Err` means the tunnel must be closed.
pub fn process(
    state: &RouterState,
    attachment: &Arc<Attachment>,
    raw: Vec<u8>,
) -> Result<(), RouterError> {
    let frame = match Frame::parse(&raw) {
        Ok(frame) => frame,
        Err(e) => {
            counters::malformed_frames_total();
            tracing::warn!(peer = %attachment.peer(), "malformed frame: {}", e);
            if let Ok(header) = Header::read(&raw) {
                counters::errors_sent_total(ErrorKind::MalformedMessage.name());
                let error =
                    Frame::error(header.msg_id, ErrorKind::MalformedMessage, None, attachment.agent());
                let _ = attachment.try_send(error.serialize());
            }
            return Err(e.into());
        }
    };

    match frame {
        Frame::RegistrationRequest {
            msg_id,
            agent_id,
            router_id,
            cookie,
            ..
        } => registration::handle(state, attachment, msg_id, agent_id, router_id, cookie),
        Frame::DataRequest {
            msg_id, src, dst, ..
        } => {
            data::forward_request(state, msg_id, src, dst, raw);
            Ok(())
        }
        Frame::DataReply { src, dst, .. } => {
            data::forward_reply(state, src, dst, raw);
            Ok(())
        }
        Frame::HeartbeatClient {
            heartbeat_id,
            agent_id,
            ..
        } => {
            heartbeat::handle(state, agent_id, heartbeat_id);
            Ok(())
        }
        Frame::Debug {
            msg_id,
            admin_cookie,
            op,
            target,
        } => {
            debug::handle(state, attachment, raw, msg_id, &admin_cookie, op, target);
            Ok(())
        }
        other @ (Frame::RegistrationReply { .. }
        | Frame::Error { .. }
        | Frame::HeartbeatRouter { .. }) => {
            tracing::debug!(
                peer = %attachment.peer(),
                frame_type = other.frame_type(),
                "ignoring router-bound frame type"
            );
            Ok(())
        }
    }
}
