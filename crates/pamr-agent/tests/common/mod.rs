#![allow(dead_code)]

use async_trait::async_trait;
use pamr_agent::{AgentConfig, MessageHandler, ReconnectConfig, Request};
use pamr_router::config::RouterConfig;
use pamr_router::RouterState;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Notify};

pub struct TestRouter {
    pub addr: SocketAddr,
    pub state: Arc<RouterState>,
    pub shutdown: watch::Sender<()>,
}

pub fn router_config(heartbeat_timeout: Duration) -> RouterConfig {
    RouterConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        heartbeat_timeout,
        nb_workers: 2,
        ..RouterConfig::default()
    }
}

pub async fn start_router(config: RouterConfig) -> TestRouter {
    let listener = TcpListener::bind(config.listen).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(RouterState::new(config).unwrap());
    let (shutdown, _) = watch::channel(());

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

/// Agent settings with short reconnection delays.
pub fn agent_config(router: SocketAddr) -> AgentConfig {
    AgentConfig {
        reconnect: ReconnectConfig {
            initial_delay_ms: 20,
            max_delay_ms: 200,
            backoff_factor: 2.0,
        },
        handshake_timeout: Duration::from_secs(2),
        ..AgentConfig::new(router)
    }
}

/// Upper-casing handler whose processing can be frozen and thawed, like an
/// application thread stuck in a long computation.
#[derive(Default)]
pub struct Freezable {
    frozen: AtomicBool,
    thawed: Notify,
}

impl Freezable {
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    pub fn thaw(&self) {
        self.frozen.store(false, Ordering::SeqCst);
        self.thawed.notify_waiters();
    }
}

pub struct Upper(pub Arc<Freezable>);

#[async_trait]
impl MessageHandler for Upper {
    async fn on_request(&self, request: &Request) -> Option<Vec<u8>> {
        loop {
            let thawed = self.0.thawed.notified();
            if !self.0.frozen.load(Ordering::SeqCst) {
                break;
            }
            thawed.await;
        }
        Some(request.payload.to_ascii_uppercase())
    }
}

/// Handler that forwards every request to the test and does not reply.
pub struct Recorder(pub mpsc::UnboundedSender<Request>);

#[async_trait]
impl MessageHandler for Recorder {
    async fn on_request(&self, request: &Request) -> Option<Vec<u8>> {
        let _ = self.0.send(request.clone());
        None
    }
}

pub fn recorder() -> (Recorder, mpsc::UnboundedReceiver<Request>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Recorder(tx), rx)
}

/// Polls `condition` until it holds or five seconds elapse.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
