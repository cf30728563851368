use crate::backoff::ExponentialBackoff;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::handler::{MessageHandler, Request};
use crate::waiting_room::WaitingRoom;
use pamr_common::frame::TYPE_DATA_REPLY;
use pamr_common::io::{read_frame, write_frame, StreamError, DEFAULT_MAX_FRAME_SIZE};
use pamr_common::types::DEFAULT_ROUTER_ID;
use pamr_common::{AgentId, ErrorKind, Frame, MagicCookie};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Frames produced while reading, such as heartbeat answers and replies.
const LOCAL_QUEUE: usize = 64;

/// Connection status of the agent's tunnel to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// No tunnel; either between attempts or stopped for good.
    Disconnected,
    /// Connecting or waiting for the registration reply.
    Connecting,
    /// Registered and ready to exchange messages.
    Connected,
}

#[derive(Debug)]
pub(crate) enum LinkError {
    Fatal(AgentError),
    Transient(AgentError),
}

impl From<AgentError> for LinkError {
    fn from(e: AgentError) -> Self {
        if e.is_fatal() {
            Self::Fatal(e)
        } else {
            Self::Transient(e)
        }
    }
}

/// What the agent must present on every registration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Identity {
    pub agent_id: Option<AgentId>,
    pub router_id: i64,
    pub cookie: MagicCookie,
}

impl Identity {
    pub(crate) const fn new(agent_id: Option<AgentId>, cookie: MagicCookie) -> Self {
        Self {
            agent_id,
            router_id: DEFAULT_ROUTER_ID,
            cookie,
        }
    }
}

/// A registered tunnel.
#[derive(Debug)]
pub(crate) struct Tunnel {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    pub agent_id: AgentId,
    /// Longest silence tolerated from the router.
    pub heartbeat_period: Option<Duration>,
}

/// Connects and registers, updating `identity` with what the router assigned.
pub(crate) async fn open(config: &AgentConfig, identity: &mut Identity) -> Result<Tunnel, LinkError> {
    timeout(config.handshake_timeout, handshake(config, identity))
        .await
        .map_err(|_| LinkError::Transient(AgentError::HandshakeTimeout))?
}

async fn handshake(config: &AgentConfig, identity: &mut Identity) -> Result<Tunnel, LinkError> {
    let stream = TcpStream::connect(config.router)
        .await
        .map_err(|e| LinkError::Transient(e.into()))?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("failed to set TCP_NODELAY: {}", e);
    }
    let (mut reader, mut writer) = stream.into_split();

    let msg_id: i64 = rand::thread_rng().gen_range(0..i64::MAX);
    let request =
        Frame::registration_request(msg_id, identity.agent_id, identity.router_id, identity.cookie);
    write_frame(&mut writer, &request.serialize())
        .await
        .map_err(|e| LinkError::Transient(e.into()))?;

    loop {
        let raw = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .map_err(|e| LinkError::Transient(e.into()))?;
        match Frame::parse(&raw).map_err(|e| LinkError::Transient(e.into()))? {
            Frame::RegistrationReply {
                msg_id: id,
                agent_id,
                router_id,
                heartbeat_period,
                ..
            } if id == msg_id => {
                identity.agent_id = Some(agent_id);
                identity.router_id = router_id;
                let heartbeat_period = u64::try_from(heartbeat_period)
                    .ok()
                    .filter(|ms| *ms > 0)
                    .map(Duration::from_millis);
                return Ok(Tunnel {
                    reader,
                    writer,
                    agent_id,
                    heartbeat_period,
                });
            }
            Frame::Error { msg_id: id, kind, .. } if id == msg_id => {
                return Err(AgentError::Rejected(kind).into());
            }
            Frame::HeartbeatRouter { .. } => {}
            other => {
                return Err(LinkError::Transient(AgentError::UnexpectedFrame(
                    other.frame_type(),
                )))
            }
        }
    }
}

/// Everything the connection manager shares with the agent handles.
pub(crate) struct Manager {
    pub config: Arc<AgentConfig>,
    pub identity: Identity,
    pub handler: Arc<dyn MessageHandler>,
    pub waiting: Arc<WaitingRoom>,
    pub outbox: mpsc::Receiver<Vec<u8>>,
    pub status: watch::Sender<ConnStatus>,
    pub shutdown: watch::Receiver<bool>,
}

impl Manager {
    /// Runs tunnels until the agent is stopped or a registration is refused.
    ///
    /// `first` is the tunnel opened by the initial registration.
    pub(crate) async fn run(mut self, first: Tunnel) {
        let mut backoff = ExponentialBackoff::from_config(&self.config.reconnect);
        let mut next = Some(first);

        loop {
            let tunnel = match next.take() {
                Some(tunnel) => tunnel,
                None => {
                    self.status.send_replace(ConnStatus::Connecting);
                    match open(&self.config, &mut self.identity).await {
                        Ok(tunnel) => {
                            info!(agent = %tunnel.agent_id, "reconnected to router");
                            backoff.reset();
                            tunnel
                        }
                        Err(LinkError::Fatal(e)) => {
                            error!(error = %e, "registration refused, not retrying");
                            self.stop();
                            return;
                        }
                        Err(LinkError::Transient(e)) => {
                            warn!(error = %e, "reconnection failed");
                            self.status.send_replace(ConnStatus::Disconnected);
                            if !self.pause(backoff.next_delay()).await {
                                self.stop();
                                return;
                            }
                            continue;
                        }
                    }
                }
            };

            self.status.send_replace(ConnStatus::Connected);
            match self.serve(tunnel).await {
                Ok(()) => {
                    info!("agent stopped");
                    self.stop();
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "tunnel lost");
                    self.status.send_replace(ConnStatus::Disconnected);
                    self.drop_unsent();
                    let failed = self.waiting.fail_all(|| AgentError::TunnelFailure);
                    if failed > 0 {
                        debug!(failed, "failed waiting callers");
                    }
                }
            }

            let delay = backoff.next_delay();
            info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting"
            );
            if !self.pause(delay).await {
                self.stop();
                return;
            }
        }
    }

    /// Sleeps unless shut down first. Returns `false` on shutdown.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            _ = self.shutdown.changed() => false,
        }
    }

    fn stop(&mut self) {
        self.status.send_replace(ConnStatus::Disconnected);
        self.outbox.close();
        self.drop_unsent();
        self.waiting.fail_all(|| AgentError::Stopped);
    }

    fn drop_unsent(&mut self) {
        let mut dropped = 0usize;
        while self.outbox.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "dropped frames queued for a broken tunnel");
        }
    }

    /// Serves one tunnel. `Ok` means the agent is done; `Err` means reconnect.
    async fn serve(&mut self, tunnel: Tunnel) -> Result<(), AgentError> {
        let Tunnel {
            mut reader,
            mut writer,
            agent_id,
            heartbeat_period,
        } = tunnel;
        let (local_tx, mut local_rx) = mpsc::channel(LOCAL_QUEUE);
        let reading = Reading {
            agent_id,
            silence_limit: heartbeat_period,
            handler: self.handler.as_ref(),
            waiting: self.waiting.as_ref(),
            local: local_tx,
        };

        tokio::select! {
            r = reading.run(&mut reader) => r,
            r = write_loop(&mut writer, &mut local_rx, &mut self.outbox) => r,
            _ = self.shutdown.changed() => Ok(()),
        }
    }
}

struct Reading<'a> {
    agent_id: AgentId,
    silence_limit: Option<Duration>,
    handler: &'a dyn MessageHandler,
    waiting: &'a WaitingRoom,
    local: mpsc::Sender<Vec<u8>>,
}

impl Reading<'_> {
    async fn next_frame(&self, reader: &mut OwnedReadHalf) -> Result<Vec<u8>, AgentError> {
        let read = read_frame(reader, DEFAULT_MAX_FRAME_SIZE);
        let raw = match self.silence_limit {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| AgentError::RouterSilent(limit))?,
            None => read.await,
        };
        raw.map_err(|e| match e {
            StreamError::Closed => AgentError::TunnelFailure,
            other => other.into(),
        })
    }

    async fn queue(&self, frame: Vec<u8>) -> Result<(), AgentError> {
        self.local
            .send(frame)
            .await
            .map_err(|_| AgentError::TunnelFailure)
    }

    async fn run(self, reader: &mut OwnedReadHalf) -> Result<(), AgentError> {
        loop {
            let raw = self.next_frame(reader).await?;
            match Frame::parse(&raw)? {
                Frame::DataRequest {
                    msg_id,
                    src,
                    dst,
                    payload,
                } => {
                    if dst != self.agent_id {
                        warn!(dst = %dst, "request addressed to another agent");
                        continue;
                    }
                    let request = Request {
                        msg_id,
                        src,
                        payload,
                    };
                    if let Some(reply) = self.handler.on_request(&request).await {
                        let frame =
                            Frame::serialize_data(TYPE_DATA_REPLY, msg_id, self.agent_id, src, &reply);
                        self.queue(frame).await?;
                    }
                }
                Frame::DataReply {
                    msg_id,
                    src,
                    payload,
                    ..
                } => {
                    if !self.waiting.deliver(src, msg_id, payload) {
                        debug!(src = %src, msg_id, "reply without a waiting caller");
                    }
                }
                Frame::HeartbeatRouter { heartbeat_id, .. } => {
                    let answer = Frame::heartbeat_client(heartbeat_id, self.agent_id);
                    self.queue(answer.serialize()).await?;
                }
                Frame::Error {
                    msg_id,
                    kind,
                    sender,
                    ..
                } => self.on_error(msg_id, kind, sender),
                other => debug!(frame_type = other.frame_type(), "ignoring unexpected frame"),
            }
        }
    }

    fn on_error(&self, msg_id: i64, kind: ErrorKind, faulty: Option<AgentId>) {
        match (kind, faulty) {
            (ErrorKind::DisconnectionBroadcast, Some(agent)) => {
                let failed = self.waiting.fail_agent(agent);
                debug!(agent = %agent, failed, "remote agent disconnected");
            }
            (ErrorKind::NotConnectedRecipient, Some(agent)) => {
                self.waiting.fail(agent, msg_id, AgentError::NotConnected(agent));
            }
            (ErrorKind::UnknownRecipient, Some(agent)) => {
                self.waiting.fail(agent, msg_id, AgentError::UnknownRecipient(agent));
            }
            (ErrorKind::MalformedMessage, _) => {
                warn!(msg_id, "router could not decode a message");
                self.waiting.fail_message(msg_id, AgentError::MalformedMessage);
            }
            (kind, _) => warn!(msg_id, error = kind.name(), "unexpected error from router"),
        }
    }
}

async fn write_loop(
    writer: &mut OwnedWriteHalf,
    local: &mut mpsc::Receiver<Vec<u8>>,
    outbox: &mut mpsc::Receiver<Vec<u8>>,
) -> Result<(), AgentError> {
    loop {
        let frame = tokio::select! {
            biased;
            Some(frame) = local.recv() => frame,
            frame = outbox.recv() => match frame {
                Some(frame) => frame,
                // every agent handle is gone
                None => return Ok(()),
            },
        };
        write_frame(writer, &frame).await?;
    }
}
