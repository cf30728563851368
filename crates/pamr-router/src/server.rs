use crate::config::RouterConfig;
use crate::connection::handle_connection;
use crate::error::RouterError;
use crate::liveness;
use crate::metrics::{counters, gauges};
use crate::reserved::ReservedConfig;
use crate::session::{Client, SessionTable};
use pamr_common::frame::ErrorKind;
use pamr_common::types::{DEFAULT_ROUTER_ID, MIN_DYNAMIC_AGENT_ID};
use pamr_common::{AgentId, Frame, MagicCookie};
use rand::rngs::OsRng;
use rand::Rng;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared state of one router run.
#[derive(Debug)]
pub struct RouterState {
    /// Runtime router configuration.
    pub config: RouterConfig,
    /// Agent id → session table.
    pub sessions: SessionTable,
    router_id: i64,
    next_agent_id: AtomicI64,
    next_attachment_id: AtomicU64,
    next_heartbeat_id: AtomicI64,
    admin_cookie: RwLock<Option<MagicCookie>>,
}

fn random_router_id() -> i64 {
    loop {
        let id: i64 = OsRng.gen();
        if id != 0 && id != DEFAULT_ROUTER_ID {
            return id;
        }
    }
}

impl RouterState {
    /// Builds the state, loading the reserved agent file if configured.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] if the reserved agent file is unreadable or invalid.
    pub fn new(config: RouterConfig) -> Result<Self, RouterError> {
        let reserved = config
            .reserved_config
            .as_deref()
            .map(ReservedConfig::load)
            .transpose()?;

        let state = Self {
            config,
            sessions: SessionTable::new(),
            router_id: random_router_id(),
            next_agent_id: AtomicI64::new(MIN_DYNAMIC_AGENT_ID),
            next_attachment_id: AtomicU64::new(1),
            next_heartbeat_id: AtomicI64::new(0),
            admin_cookie: RwLock::new(None),
        };
        if let Some(reserved) = reserved {
            state.apply_reserved(reserved);
        }
        info!(router_id = state.router_id, "router state initialised");
        Ok(state)
    }

    /// Identity of this router run.
    #[must_use]
    pub const fn router_id(&self) -> i64 {
        self.router_id
    }

    /// Hands out a fresh dynamic agent id. Ids are never reused.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::IdsExhausted`] once the counter overflows.
    pub fn allocate_agent_id(&self) -> Result<AgentId, RouterError> {
        let raw = self.next_agent_id.fetch_add(1, Ordering::Relaxed);
        AgentId::new(raw)
            .filter(|id| !id.is_reserved())
            .ok_or(RouterError::IdsExhausted)
    }

    pub(crate) fn next_attachment_id(&self) -> u64 {
        self.next_attachment_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_heartbeat_id(&self) -> i64 {
        self.next_heartbeat_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Heartbeat period advertised to agents, in milliseconds.
    #[must_use]
    pub fn heartbeat_period_ms(&self) -> i32 {
        i32::try_from(self.config.heartbeat_timeout.as_millis()).unwrap_or(i32::MAX)
    }

    /// Checks an admin cookie. Always fails without a reserved agent file.
    #[must_use]
    pub fn admin_cookie_matches(&self, cookie: &MagicCookie) -> bool {
        self.admin_cookie
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|admin| admin == *cookie)
    }

    /// Re-reads the reserved agent file.
    ///
    /// On failure the current configuration is kept.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] if no file is configured, or it is unreadable
    /// or invalid.
    pub fn reload_reserved(&self) -> Result<usize, RouterError> {
        let path = self
            .config
            .reserved_config
            .as_deref()
            .ok_or_else(|| RouterError::Config("no configuration file".to_string()))?;
        let reserved = ReservedConfig::load(path)?;
        let count = reserved.agents.len();
        self.apply_reserved(reserved);
        info!(path = %path.display(), agents = count, "reserved agent configuration reloaded");
        Ok(count)
    }

    fn apply_reserved(&self, reserved: ReservedConfig) {
        let mut disconnected = Vec::new();
        for client in self.sessions.snapshot() {
            let id = client.agent_id();
            if client.is_reserved() && !reserved.agents.contains_key(&id) {
                if client.detach().is_some() {
                    disconnected.push(id);
                }
                self.sessions.remove(&id);
                info!(agent = %id, "reserved agent removed");
            }
        }

        for (id, cookie) in reserved.agents {
            let client = Arc::new(Client::new(id, cookie, true, self.config.cache_size));
            if let Some(old) = self.sessions.insert(client) {
                if old.detach().is_some() {
                    debug!(agent = %id, "closed tunnel of reloaded reserved agent");
                    disconnected.push(id);
                }
            }
        }

        for id in disconnected {
            counters::disconnections_total("reload");
            self.broadcast_disconnection(id);
        }

        *self.admin_cookie.write().unwrap_or_else(PoisonError::into_inner) =
            Some(reserved.admin_cookie);
        gauges::sessions(self.sessions.len());
    }

    /// Tells every other connected agent that `faulty` lost its tunnel.
    pub fn broadcast_disconnection(&self, faulty: AgentId) {
        let mut notified = 0usize;
        for client in self.sessions.snapshot() {
            let recipient = client.agent_id();
            if recipient == faulty || !client.is_connected() {
                continue;
            }
            let frame = Frame::error(
                0,
                ErrorKind::DisconnectionBroadcast,
                Some(faulty),
                Some(recipient),
            );
            if client.send(frame.serialize()) {
                notified += 1;
            }
        }
        counters::errors_sent_total(ErrorKind::DisconnectionBroadcast.name());
        debug!(agent = %faulty, notified, "disconnection broadcast");
    }

    /// Closes every installed tunnel.
    pub fn close_all(&self) {
        for client in self.sessions.snapshot() {
            client.detach();
        }
    }
}

/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<RouterState>) -> Result<(), RouterError> {
    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    run_with_shutdown(listener, state, shutdown_tx).await
}

/// Run the router accept loop with an externally-controlled shutdown signal.
///
/// When `shutdown_tx` fires, the accept loop and the liveness sweeps stop,
/// every tunnel is closed and in-flight connections are drained.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<RouterState>,
    shutdown_tx: tokio::sync::watch::Sender<()>,
) -> Result<(), RouterError> {
    let local_addr = listener.local_addr().map_err(RouterError::Io)?;
    info!(router_id = state.router_id(), "router listening on {}", local_addr);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let task_tracker = Arc::new(tokio::sync::Notify::new());
    let mut active_tasks: usize = 0;

    let sweeps = liveness::spawn(Arc::clone(&state), shutdown_tx.subscribe());

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        let tracker = task_tracker.clone();
                        let shutdown = shutdown_tx.subscribe();
                        active_tasks += 1;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, state, shutdown).await {
                                debug!("connection from {} closed: {}", addr, e);
                            }
                            tracker.notify_one();
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, draining {} connections", active_tasks);
                break;
            }
        }
    }

    state.close_all();
    for sweep in sweeps {
        sweep.abort();
    }

    let drain_timeout = std::time::Duration::from_secs(5);
    let deadline = tokio::time::Instant::now() + drain_timeout;
    while active_tasks > 0 {
        if tokio::time::timeout_at(deadline, task_tracker.notified())
            .await
            .is_err()
        {
            warn!(
                "drain timeout reached with {} connections still active",
                active_tasks
            );
            break;
        }
        active_tasks = active_tasks.saturating_sub(1);
    }

    info!("router shut down gracefully");
    Ok(())
}
