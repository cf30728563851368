use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::handler::{MessageHandler, Request};
use crate::tunnel::{self, ConnStatus, Identity, LinkError, Manager};
use crate::waiting_room::WaitingRoom;
use pamr_common::frame::{TYPE_DATA_REPLY, TYPE_DATA_REQUEST};
use pamr_common::{AgentId, Frame};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

#[derive(Debug)]
struct Shared {
    agent_id: AgentId,
    outbox: mpsc::Sender<Vec<u8>>,
    waiting: Arc<WaitingRoom>,
    status: watch::Receiver<ConnStatus>,
    shutdown: watch::Sender<bool>,
    next_msg_id: AtomicI64,
}

/// Handle on a registered agent. Cheap to clone.
///
/// The tunnel is kept alive in the background, reconnecting with the same
/// identity, until [`Agent::shutdown`] is called or every handle is dropped.
#[derive(Debug, Clone)]
pub struct Agent {
    shared: Arc<Shared>,
}

impl Agent {
    /// Connects to the router and registers.
    ///
    /// Returns once the first registration succeeded; later tunnel failures
    /// are retried in the background.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] for an invalid configuration and the
    /// registration failure if the first attempt does not succeed.
    pub async fn register<H>(config: AgentConfig, handler: H) -> Result<Self, AgentError>
    where
        H: MessageHandler,
    {
        config.validate().map_err(AgentError::Config)?;

        let mut identity = Identity::new(config.agent_id, config.cookie);
        let first = tunnel::open(&config, &mut identity).await.map_err(|e| match e {
            LinkError::Fatal(e) | LinkError::Transient(e) => e,
        })?;
        let agent_id = first.agent_id;
        info!(agent = %agent_id, router = %config.router, "registered with router");

        let (outbox_tx, outbox_rx) = mpsc::channel(config.outbound_queue);
        let (status_tx, status_rx) = watch::channel(ConnStatus::Connected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let waiting = Arc::new(WaitingRoom::new());

        let manager = Manager {
            config: Arc::new(config),
            identity,
            handler: Arc::new(handler),
            waiting: Arc::clone(&waiting),
            outbox: outbox_rx,
            status: status_tx,
            shutdown: shutdown_rx,
        };
        tokio::spawn(manager.run(first));

        Ok(Self {
            shared: Arc::new(Shared {
                agent_id,
                outbox: outbox_tx,
                waiting,
                status: status_rx,
                shutdown: shutdown_tx,
                next_msg_id: AtomicI64::new(1),
            }),
        })
    }

    /// Id assigned by the router (or the configured reserved id).
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        self.shared.agent_id
    }

    /// Current state of the tunnel.
    #[must_use]
    pub fn status(&self) -> ConnStatus {
        *self.shared.status.borrow()
    }

    /// Watch channel following the tunnel state.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<ConnStatus> {
        self.shared.status.clone()
    }

    /// Sends a request to `dst`.
    ///
    /// Unless `one_way`, waits for the matching reply and returns its payload.
    /// The wait ends with an error when the router reports the destination
    /// unknown or unreachable, when the destination disconnects, or when
    /// this agent's tunnel breaks.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::TunnelFailure`] if the tunnel is down or breaks,
    /// [`AgentError::RemoteDisconnected`], [`AgentError::NotConnected`],
    /// [`AgentError::UnknownRecipient`] or [`AgentError::MalformedMessage`]
    /// as reported by the router, and [`AgentError::Stopped`] after shutdown.
    pub async fn send_msg(
        &self,
        dst: AgentId,
        payload: &[u8],
        one_way: bool,
    ) -> Result<Option<Vec<u8>>, AgentError> {
        let shared = &self.shared;
        let msg_id = shared.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let waiter = (!one_way).then(|| shared.waiting.enter(dst, msg_id));

        if self.status() != ConnStatus::Connected {
            shared.waiting.leave(dst, msg_id);
            return Err(AgentError::TunnelFailure);
        }
        let frame = Frame::serialize_data(TYPE_DATA_REQUEST, msg_id, shared.agent_id, dst, payload);
        if shared.outbox.send(frame).await.is_err() {
            shared.waiting.leave(dst, msg_id);
            return Err(AgentError::Stopped);
        }

        let Some(waiter) = waiter else {
            return Ok(None);
        };
        match waiter.await {
            Ok(result) => result.map(Some),
            Err(_) => Err(AgentError::TunnelFailure),
        }
    }

    /// Replies to `request` outside of [`MessageHandler::on_request`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::TunnelFailure`] if the tunnel is down and
    /// [`AgentError::Stopped`] after shutdown.
    pub async fn send_reply(&self, request: &Request, payload: &[u8]) -> Result<(), AgentError> {
        if self.status() != ConnStatus::Connected {
            return Err(AgentError::TunnelFailure);
        }
        let frame = Frame::serialize_data(
            TYPE_DATA_REPLY,
            request.msg_id,
            self.shared.agent_id,
            request.src,
            payload,
        );
        self.shared
            .outbox
            .send(frame)
            .await
            .map_err(|_| AgentError::Stopped)
    }

    /// Closes the tunnel and stops reconnecting. Waiting callers fail with
    /// [`AgentError::Stopped`].
    pub fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
    }
}
