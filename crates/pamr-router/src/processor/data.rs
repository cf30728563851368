//! Forwarding of data requests and replies.

use crate::metrics::counters;
use crate::server::RouterState;
use pamr_common::frame::ErrorKind;
use pamr_common::{AgentId, Frame};
use tracing::debug;

/// Forwards a request; an unreachable recipient turns into an error for the sender.
pub(super) fn forward_request(
    state: &RouterState,
    msg_id: i64,
    src: AgentId,
    dst: AgentId,
    raw: Vec<u8>,
) {
    let kind = match state.sessions.get(&dst) {
        Some(recipient) => {
            if recipient.send(raw) {
                counters::frames_forwarded_total("request");
                return;
            }
            ErrorKind::NotConnectedRecipient
        }
        None => ErrorKind::UnknownRecipient,
    };
    notify_sender(state, msg_id, src, dst, kind);
}

/// Forwards a reply; a disconnected recipient gets it on reconnection.
pub(super) fn forward_reply(state: &RouterState, src: AgentId, dst: AgentId, raw: Vec<u8>) {
    match state.sessions.get(&dst) {
        Some(recipient) => {
            if recipient.send_or_cache(raw) {
                counters::frames_forwarded_total("reply");
            } else {
                debug!(src = %src, dst = %dst, "reply cached for disconnected agent");
            }
        }
        None => {
            counters::frames_dropped_total("unknown_recipient");
            debug!(src = %src, dst = %dst, "dropping reply to unknown agent");
        }
    }
}

fn notify_sender(state: &RouterState, msg_id: i64, src: AgentId, faulty: AgentId, kind: ErrorKind) {
    let Some(sender) = state.sessions.get(&src) else {
        counters::frames_dropped_total("unknown_sender");
        debug!(src = %src, dst = %faulty, reason = kind.name(), "dropping request from unknown agent");
        return;
    };
    debug!(src = %src, dst = %faulty, reason = kind.name(), "request not delivered");
    counters::errors_sent_total(kind.name());
    let error = Frame::error(msg_id, kind, Some(faulty), Some(src));
    sender.send_or_cache(error.serialize());
}
