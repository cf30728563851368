//! Administrative operations carried by DEBUG frames.

use crate::metrics::counters;
use crate::server::RouterState;
use crate::session::Attachment;
use pamr_common::frame::{DebugOp, ErrorKind};
use pamr_common::{AgentId, Frame, MagicCookie};
use tracing::{error, info, warn};

const fn op_name(op: DebugOp) -> &'static str {
    match op {
        DebugOp::Probe => "probe",
        DebugOp::Disconnect => "disconnect",
        DebugOp::Reload => "reload",
    }
}

fn send_error(attachment: &Attachment, msg_id: i64, kind: ErrorKind, faulty: Option<AgentId>) {
    counters::errors_sent_total(kind.name());
    let frame = Frame::error(msg_id, kind, faulty, attachment.agent());
    let _ = attachment.try_send(frame.serialize());
}

/// Runs an admin op and echoes the frame back on success.
pub(super) fn handle(
    state: &RouterState,
    attachment: &Attachment,
    raw: Vec<u8>,
    msg_id: i64,
    admin_cookie: &MagicCookie,
    op: DebugOp,
    target: Option<AgentId>,
) {
    let name = op_name(op);
    if !state.admin_cookie_matches(admin_cookie) {
        counters::admin_ops_total(name, "unauthorized");
        warn!(peer = %attachment.peer(), op = name, "unauthorized admin operation");
        send_error(attachment, msg_id, ErrorKind::Unauthorized, None);
        return;
    }

    match op {
        DebugOp::Probe => {}
        DebugOp::Disconnect => {
            let Some((id, client)) = target.and_then(|id| state.sessions.get(&id).map(|c| (id, c)))
            else {
                counters::admin_ops_total(name, "unknown_target");
                send_error(attachment, msg_id, ErrorKind::UnknownRecipient, target);
                return;
            };
            if client.detach().is_some() {
                info!(agent = %id, "agent disconnected by admin");
                counters::disconnections_total("admin");
                state.broadcast_disconnection(id);
            }
        }
        DebugOp::Reload => {
            if let Err(e) = state.reload_reserved() {
                counters::admin_ops_total(name, "failed");
                error!("reload failed, keeping current configuration: {}", e);
                return;
            }
        }
    }

    counters::admin_ops_total(name, "ok");
    let _ = attachment.try_send(raw);
}
