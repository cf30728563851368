//! Registration and reconnection of agents.

use crate::error::RouterError;
use crate::metrics::{counters, gauges};
use crate::server::RouterState;
use crate::session::{Attachment, Client};
use pamr_common::frame::ErrorKind;
use pamr_common::types::DEFAULT_ROUTER_ID;
use pamr_common::{AgentId, Frame, MagicCookie};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(super) fn handle(
    state: &RouterState,
    attachment: &Arc<Attachment>,
    msg_id: i64,
    agent_id: Option<AgentId>,
    router_id: i64,
    cookie: MagicCookie,
) -> Result<(), RouterError> {
    if let Some(bound) = attachment.agent() {
        warn!(agent = %bound, peer = %attachment.peer(), "registration on an already registered tunnel");
        return Err(RouterError::AlreadyRegistered(bound));
    }

    match agent_id {
        None => connect(state, attachment, msg_id, router_id, cookie),
        Some(id) if id.is_reserved() => {
            if router_id != DEFAULT_ROUTER_ID && router_id != state.router_id() {
                return reject(attachment, msg_id, id, ErrorKind::InvalidRouterId);
            }
            reclaim(state, attachment, msg_id, id, cookie, true)
        }
        Some(id) => {
            if router_id != state.router_id() {
                return reject(attachment, msg_id, id, ErrorKind::InvalidRouterId);
            }
            reclaim(state, attachment, msg_id, id, cookie, false)
        }
    }
}

fn reply(state: &RouterState, msg_id: i64, agent_id: AgentId, cookie: MagicCookie) -> Vec<u8> {
    Frame::RegistrationReply {
        msg_id,
        agent_id,
        router_id: state.router_id(),
        heartbeat_period: state.heartbeat_period_ms(),
        cookie,
    }
    .serialize()
}

/// First registration: allocate an id and create the session.
fn connect(
    state: &RouterState,
    attachment: &Arc<Attachment>,
    msg_id: i64,
    router_id: i64,
    cookie: MagicCookie,
) -> Result<(), RouterError> {
    if router_id != DEFAULT_ROUTER_ID {
        counters::registrations_total("rejected");
        warn!(peer = %attachment.peer(), router_id, "first registration carries a router id");
        return Err(RouterError::Rejected(ErrorKind::InvalidRouterId));
    }

    let agent_id = state.allocate_agent_id()?;
    let client = Arc::new(Client::new(agent_id, cookie, false, state.config.cache_size));
    let outcome = client.reattach(Arc::clone(attachment), reply(state, msg_id, agent_id, cookie));
    if !outcome.replied {
        counters::registrations_total("failed");
        debug!(agent = %agent_id, "failed to queue registration reply");
        return Err(RouterError::ConnectionClosed);
    }

    attachment.bind(agent_id);
    state.sessions.insert(client);
    gauges::sessions(state.sessions.len());
    counters::registrations_total("connected");
    info!(agent = %agent_id, peer = %attachment.peer(), "agent connected");
    Ok(())
}

/// Reconnection with a previously issued or reserved id.
fn reclaim(
    state: &RouterState,
    attachment: &Arc<Attachment>,
    msg_id: i64,
    agent_id: AgentId,
    cookie: MagicCookie,
    reserved: bool,
) -> Result<(), RouterError> {
    let client = match state.sessions.get(&agent_id) {
        Some(client) if client.is_reserved() == reserved => client,
        _ => return reject(attachment, msg_id, agent_id, ErrorKind::InvalidAgentId),
    };
    if !client.cookie_matches(&cookie) {
        return reject(attachment, msg_id, agent_id, ErrorKind::WrongMagicCookie);
    }

    let frame = reply(state, msg_id, agent_id, cookie);
    let Some(outcome) = state.sessions.with_session(&agent_id, |current| {
        Arc::ptr_eq(current, &client).then(|| client.reattach(Arc::clone(attachment), frame))
    })
    .flatten() else {
        // evicted or replaced by a reload since the lookup
        return reject(attachment, msg_id, agent_id, ErrorKind::InvalidAgentId);
    };
    attachment.bind(agent_id);
    if let Some(old) = &outcome.replaced {
        debug!(agent = %agent_id, old_peer = %old.peer(), "replaced previous tunnel");
    }
    if outcome.replied {
        counters::registrations_total("reconnected");
        info!(
            agent = %agent_id,
            peer = %attachment.peer(),
            flushed = outcome.flushed,
            "agent reconnected"
        );
    } else {
        counters::registrations_total("failed");
        warn!(agent = %agent_id, "failed to queue registration reply, keeping cache");
    }
    Ok(())
}

fn reject(
    attachment: &Attachment,
    msg_id: i64,
    agent_id: AgentId,
    kind: ErrorKind,
) -> Result<(), RouterError> {
    counters::registrations_total("rejected");
    counters::errors_sent_total(kind.name());
    warn!(agent = %agent_id, peer = %attachment.peer(), reason = kind.name(), "registration rejected");
    let error = Frame::error(msg_id, kind, Some(agent_id), Some(agent_id));
    if attachment.try_send(error.serialize()).is_err() {
        debug!(agent = %agent_id, "failed to queue rejection");
    }
    Err(RouterError::Rejected(kind))
}
