use async_trait::async_trait;
use pamr_common::AgentId;

/// A request received from another agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Correlation id chosen by the sender.
    pub msg_id: i64,
    /// Sending agent.
    pub src: AgentId,
    /// Opaque request payload.
    pub payload: Vec<u8>,
}

/// Application side of an agent.
///
/// Requests are handled one at a time, in receipt order, on the task that
/// reads the tunnel. A handler that never returns stops the agent from
/// answering router heartbeats.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles one request. Returning a payload sends it back as the reply.
    async fn on_request(&self, request: &Request) -> Option<Vec<u8>>;
}

/// Handler that answers every request with its own payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

#[async_trait]
impl MessageHandler for Echo {
    async fn on_request(&self, request: &Request) -> Option<Vec<u8>> {
        Some(request.payload.clone())
    }
}

/// Handler that never replies.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ignore;

#[async_trait]
impl MessageHandler for Ignore {
    async fn on_request(&self, request: &Request) -> Option<Vec<u8>> {
        tracing::debug!(src = %request.src, msg_id = request.msg_id, "ignoring request");
        None
    }
}
