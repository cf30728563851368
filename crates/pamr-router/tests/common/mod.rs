#![allow(dead_code)]

use pamr_common::io::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
use pamr_common::types::DEFAULT_ROUTER_ID;
use pamr_common::{AgentId, ErrorKind, Frame, MagicCookie};
use pamr_router::config::RouterConfig;
use pamr_router::RouterState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

pub fn test_config() -> RouterConfig {
    RouterConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        heartbeat_timeout: Duration::from_secs(30),
        nb_workers: 2,
        ..RouterConfig::default()
    }
}

pub struct TestRouter {
    pub addr: SocketAddr,
    pub state: Arc<RouterState>,
    pub shutdown: tokio::sync::watch::Sender<()>,
}

pub async fn start_router(config: RouterConfig) -> TestRouter {
    let listener = TcpListener::bind(config.listen).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(RouterState::new(config).unwrap());
    let (shutdown, _) = tokio::sync::watch::channel(());

    let state_clone = Arc::clone(&state);
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = pamr_router::run_with_shutdown(listener, state_clone, shutdown_clone).await {
            eprintln!("router error in test: {e}");
        }
    });

    TestRouter {
        addr,
        state,
        shutdown,
    }
}

/// A raw-frame agent, driven by hand.
pub struct TestClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    pub agent_id: Option<AgentId>,
    pub router_id: i64,
    pub cookie: MagicCookie,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer,
            agent_id: None,
            router_id: DEFAULT_ROUTER_ID,
            cookie: MagicCookie::random(),
        }
    }

    /// Connects and completes a first registration.
    pub async fn register(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        client.send_registration(1).await;
        match client.recv().await {
            Frame::RegistrationReply {
                agent_id,
                router_id,
                ..
            } => {
                client.agent_id = Some(agent_id);
                client.router_id = router_id;
            }
            other => panic!("expected RegistrationReply, got {other:?}"),
        }
        client
    }

    /// Opens a new tunnel for an already registered identity.
    pub async fn reconnect(&self, addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        client.agent_id = self.agent_id;
        client.router_id = self.router_id;
        client.cookie = self.cookie;
        client
    }

    pub fn id(&self) -> AgentId {
        self.agent_id.expect("client is not registered")
    }

    pub async fn send(&mut self, frame: &Frame) {
        write_frame(&mut self.writer, &frame.serialize()).await.unwrap();
    }

    pub async fn send_raw(&mut self, raw: &[u8]) {
        write_frame(&mut self.writer, raw).await.unwrap();
    }

    pub async fn send_registration(&mut self, msg_id: i64) {
        let frame =
            Frame::registration_request(msg_id, self.agent_id, self.router_id, self.cookie);
        self.send(&frame).await;
    }

    pub async fn send_request(&mut self, msg_id: i64, dst: AgentId, payload: &[u8]) {
        let frame = Frame::DataRequest {
            msg_id,
            src: self.id(),
            dst,
            payload: payload.to_vec(),
        };
        self.send(&frame).await;
    }

    pub async fn send_reply(&mut self, msg_id: i64, dst: AgentId, payload: &[u8]) {
        let frame = Frame::DataReply {
            msg_id,
            src: self.id(),
            dst,
            payload: payload.to_vec(),
        };
        self.send(&frame).await;
    }

    pub async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        tokio::time::timeout(
            Duration::from_secs(5),
            read_frame(&mut self.reader, DEFAULT_MAX_FRAME_SIZE),
        )
        .await
        .expect("timeout waiting for frame")
        .ok()
    }

    pub async fn recv(&mut self) -> Frame {
        let raw = self.recv_raw().await.expect("tunnel closed");
        Frame::parse(&raw).unwrap()
    }

    /// Next frame that is not a router heartbeat.
    pub async fn recv_skip_heartbeats(&mut self) -> Frame {
        loop {
            match self.recv().await {
                Frame::HeartbeatRouter { .. } => {}
                frame => return frame,
            }
        }
    }

    /// Next frame that is neither a router heartbeat nor a disconnection broadcast.
    pub async fn recv_skip_heartbeats_and_broadcasts(&mut self) -> Frame {
        loop {
            match self.recv_skip_heartbeats().await {
                Frame::Error {
                    kind: ErrorKind::DisconnectionBroadcast,
                    ..
                } => {}
                frame => return frame,
            }
        }
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Frame> {
        let raw = tokio::time::timeout(timeout, read_frame(&mut self.reader, DEFAULT_MAX_FRAME_SIZE))
            .await
            .ok()?
            .ok()?;
        Frame::parse(&raw).ok()
    }

    /// Waits until the router closes the tunnel.
    pub async fn expect_closed(&mut self) {
        loop {
            let next = tokio::time::timeout(
                Duration::from_secs(5),
                read_frame(&mut self.reader, DEFAULT_MAX_FRAME_SIZE),
            )
            .await
            .expect("tunnel was not closed");
            if next.is_err() {
                return;
            }
        }
    }
}

/// Polls `condition` until it holds or two seconds elapse.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
