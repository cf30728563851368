use crate::metrics::counters;
use dashmap::DashMap;
use pamr_common::{AgentId, MagicCookie};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Handle on one accepted TCP tunnel.
///
/// Sending never blocks: a full or closed queue is a send failure.
#[derive(Debug)]
pub struct Attachment {
    id: u64,
    peer: SocketAddr,
    tx: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
    agent: OnceLock<AgentId>,
    dropped: AtomicBool,
}

impl Attachment {
    /// Creates an attachment with an outbound queue of `queue` frames.
    ///
    /// Returns the receiving half of the queue and the close signal for the
    /// task that owns the socket.
    #[must_use]
    pub fn new(
        id: u64,
        peer: SocketAddr,
        queue: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>, watch::Receiver<bool>) {
        let (tx, rx) = mpsc::channel(queue);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let attachment = Arc::new(Self {
            id,
            peer,
            tx,
            shutdown,
            agent: OnceLock::new(),
            dropped: AtomicBool::new(false),
        });
        (attachment, rx, shutdown_rx)
    }

    /// Unique id of this tunnel.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Remote address of this tunnel.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a frame for the socket writer.
    ///
    /// # Errors
    ///
    /// Gives the frame back if the tunnel is closed or its queue is full.
    pub fn try_send(&self, frame: Vec<u8>) -> Result<(), Vec<u8>> {
        if self.is_closed() {
            return Err(frame);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(frame) => {
                counters::send_failures_total("full");
                frame
            }
            mpsc::error::TrySendError::Closed(frame) => {
                counters::send_failures_total("closed");
                frame
            }
        })
    }

    /// Asks the owning task to close the socket.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns `true` once [`close`](Self::close) was called or the owning
    /// task is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.tx.is_closed()
    }

    /// Binds the tunnel to a registered agent. Only the first call wins.
    pub fn bind(&self, agent: AgentId) -> bool {
        self.agent.set(agent).is_ok()
    }

    /// Agent this tunnel was registered for, if any.
    #[must_use]
    pub fn agent(&self) -> Option<AgentId> {
        self.agent.get().copied()
    }

    /// Returns `true` if the session discarded this tunnel after a failed
    /// send. Frames queued on it may never reach the agent.
    #[must_use]
    pub fn dropped_by_session(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }
}

#[derive(Debug)]
struct ClientState {
    cookie: MagicCookie,
    attachment: Option<Arc<Attachment>>,
    last_seen: Instant,
    disconnected_at: Option<Instant>,
    pending: VecDeque<Vec<u8>>,
}

impl ClientState {
    fn discard_attachment(&mut self, now: Instant) -> Option<Arc<Attachment>> {
        let old = self.attachment.take()?;
        old.close();
        self.disconnected_at = Some(now);
        Some(old)
    }

    /// Sends on the current attachment; a failure discards it.
    fn send(&mut self, frame: Vec<u8>) -> Result<(), Vec<u8>> {
        let Some(attachment) = &self.attachment else {
            return Err(frame);
        };
        match attachment.try_send(frame) {
            Ok(()) => Ok(()),
            Err(frame) => {
                attachment.mark_dropped();
                self.discard_attachment(Instant::now());
                Err(frame)
            }
        }
    }
}

/// Outcome of installing a new tunnel on an existing session.
#[derive(Debug)]
pub struct Reattached {
    /// Tunnel that was replaced and closed.
    pub replaced: Option<Arc<Attachment>>,
    /// Whether the registration reply could be queued.
    pub replied: bool,
    /// Cached frames delivered on the new tunnel.
    pub flushed: usize,
}

/// Router-side state of one agent.
///
/// Every mutation goes through the session's own mutex.
#[derive(Debug)]
pub struct Client {
    agent_id: AgentId,
    reserved: bool,
    cache_size: usize,
    state: Mutex<ClientState>,
}

impl Client {
    /// Creates a disconnected session.
    #[must_use]
    pub fn new(agent_id: AgentId, cookie: MagicCookie, reserved: bool, cache_size: usize) -> Self {
        let now = Instant::now();
        Self {
            agent_id,
            reserved,
            cache_size,
            state: Mutex::new(ClientState {
                cookie,
                attachment: None,
                last_seen: now,
                disconnected_at: Some(now),
                pending: VecDeque::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id of this agent.
    #[must_use]
    pub const fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Whether this session comes from the reserved agent configuration.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.reserved
    }

    /// Constant-time comparison against the session cookie.
    #[must_use]
    pub fn cookie_matches(&self, cookie: &MagicCookie) -> bool {
        self.state().cookie == *cookie
    }

    /// Returns `true` while a tunnel is installed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().attachment.is_some()
    }

    /// Id of the installed tunnel, if any.
    #[must_use]
    pub fn attachment_id(&self) -> Option<u64> {
        self.state().attachment.as_ref().map(|a| a.id())
    }

    /// Installs `attachment`, queues `reply` on it and, if that worked,
    /// refreshes liveness and flushes the cache in enqueue order.
    ///
    /// The previous tunnel, if any, is closed. When the reply cannot be
    /// queued the new tunnel stays installed and the cache is kept.
    pub fn reattach(&self, attachment: Arc<Attachment>, reply: Vec<u8>) -> Reattached {
        let mut state = self.state();
        let replaced = state.attachment.replace(Arc::clone(&attachment));
        if let Some(old) = &replaced {
            old.close();
        }
        state.disconnected_at = None;

        if attachment.try_send(reply).is_err() {
            return Reattached {
                replaced,
                replied: false,
                flushed: 0,
            };
        }
        state.last_seen = Instant::now();

        let mut flushed = 0;
        while let Some(frame) = state.pending.pop_front() {
            if let Err(frame) = state.send(frame) {
                state.pending.push_front(frame);
                break;
            }
            flushed += 1;
        }
        Reattached {
            replaced,
            replied: true,
            flushed,
        }
    }

    /// Closes and removes the installed tunnel.
    pub fn detach(&self) -> Option<Arc<Attachment>> {
        self.state().discard_attachment(Instant::now())
    }

    /// Detaches only if `attachment_id` is still the installed tunnel.
    pub fn detach_if(&self, attachment_id: u64) -> bool {
        let mut state = self.state();
        if state.attachment.as_ref().map(|a| a.id()) != Some(attachment_id) {
            return false;
        }
        state.discard_attachment(Instant::now()).is_some()
    }

    /// Marks the agent as alive now.
    pub fn touch(&self) {
        self.state().last_seen = Instant::now();
    }

    /// Last time the agent proved it was alive.
    #[must_use]
    pub fn last_seen(&self) -> Instant {
        self.state().last_seen
    }

    /// Sends immediately. A failure discards the tunnel; nothing is cached.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        self.state().send(frame).is_ok()
    }

    /// Sends immediately, or caches the frame for the next reconnection.
    ///
    /// Returns `true` if the frame was sent.
    pub fn send_or_cache(&self, frame: Vec<u8>) -> bool {
        let mut state = self.state();
        match state.send(frame) {
            Ok(()) => true,
            Err(frame) => {
                self.push_pending(&mut state, frame);
                false
            }
        }
    }

    /// Caches a frame for the next reconnection.
    pub fn cache(&self, frame: Vec<u8>) {
        let mut state = self.state();
        self.push_pending(&mut state, frame);
    }

    fn push_pending(&self, state: &mut ClientState, frame: Vec<u8>) {
        if state.pending.len() >= self.cache_size {
            state.pending.pop_front();
            counters::cache_overflow_total();
            tracing::warn!(agent = %self.agent_id, limit = self.cache_size, "pending cache full, dropping oldest frame");
        }
        state.pending.push_back(frame);
        counters::frames_cached_total();
    }

    /// Number of cached frames.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Detaches the tunnel if the session stayed silent for longer than
    /// `timeout` as of `now`. Returns `true` if a tunnel was detached.
    ///
    /// A registration that refreshed the session after `now` keeps it alive.
    pub fn detach_if_expired(&self, now: Instant, timeout: Duration) -> bool {
        let mut state = self.state();
        if state.attachment.is_none() || now.saturating_duration_since(state.last_seen) <= timeout {
            return false;
        }
        state.discard_attachment(now).is_some()
    }

    /// Dynamic session disconnected for at least `timeout`.
    #[must_use]
    pub fn evictable(&self, now: Instant, timeout: Duration) -> bool {
        if self.reserved {
            return false;
        }
        let state = self.state();
        state.attachment.is_none()
            && state
                .disconnected_at
                .is_some_and(|at| now.saturating_duration_since(at) >= timeout)
    }
}

/// Concurrent agent id → session table.
#[derive(Debug, Default)]
pub struct SessionTable {
    clients: DashMap<AgentId, Arc<Client>>,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, returning any previous session for the same id.
    pub fn insert(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        self.clients.insert(client.agent_id(), client)
    }

    /// Look up a session by agent id.
    #[must_use]
    pub fn get(&self, agent_id: &AgentId) -> Option<Arc<Client>> {
        self.clients.get(agent_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Runs `f` on a session while its table entry is locked, so the session
    /// cannot be removed until `f` returns. `f` must not touch the table.
    pub fn with_session<T>(&self, agent_id: &AgentId, f: impl FnOnce(&Arc<Client>) -> T) -> Option<T> {
        self.clients.get(agent_id).map(|entry| f(entry.value()))
    }

    /// Remove a session unconditionally.
    pub fn remove(&self, agent_id: &AgentId) -> Option<Arc<Client>> {
        self.clients.remove(agent_id).map(|(_, client)| client)
    }

    /// Remove a session only if `predicate` holds while the entry is locked.
    pub fn remove_if(
        &self,
        agent_id: &AgentId,
        predicate: impl FnOnce(&Client) -> bool,
    ) -> Option<Arc<Client>> {
        self.clients
            .remove_if(agent_id, |_, client| predicate(client))
            .map(|(_, client)| client)
    }

    /// Copies out every session so callers can lock them one at a time.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Client>> {
        self.clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
