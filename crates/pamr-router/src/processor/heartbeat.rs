use crate::server::RouterState;
use pamr_common::AgentId;

pub(super) fn handle(state: &RouterState, agent_id: AgentId, heartbeat_id: i64) {
    match state.sessions.get(&agent_id) {
        Some(client) => client.touch(),
        None => tracing::debug!(agent = %agent_id, heartbeat_id, "heartbeat from unknown agent"),
    }
}
