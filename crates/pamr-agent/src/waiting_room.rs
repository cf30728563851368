//! Callers blocked on a reply, keyed by destination and message id.

use crate::error::AgentError;
use pamr_common::AgentId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Outcome handed to a waiting caller.
pub type ReplyResult = Result<Vec<u8>, AgentError>;

type Key = (AgentId, i64);

/// Pending request/reply correlations of one agent.
#[derive(Debug, Default)]
pub struct WaitingRoom {
    waiters: Mutex<HashMap<Key, oneshot::Sender<ReplyResult>>>,
}

impl WaitingRoom {
    /// Creates an empty room.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<Key, oneshot::Sender<ReplyResult>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a caller waiting for the reply to `msg_id` from `dst`.
    pub fn enter(&self, dst: AgentId, msg_id: i64) -> oneshot::Receiver<ReplyResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters().insert((dst, msg_id), tx);
        rx
    }

    /// Forgets a waiter without waking it.
    pub fn leave(&self, dst: AgentId, msg_id: i64) -> bool {
        self.waiters().remove(&(dst, msg_id)).is_some()
    }

    fn wake(&self, key: Key, result: ReplyResult) -> bool {
        let Some(tx) = self.waiters().remove(&key) else {
            return false;
        };
        // the caller may have given up already
        let _ = tx.send(result);
        true
    }

    /// Hands a reply from `src` to the matching waiter.
    pub fn deliver(&self, src: AgentId, msg_id: i64, payload: Vec<u8>) -> bool {
        self.wake((src, msg_id), Ok(payload))
    }

    /// Fails the waiter of one request.
    pub fn fail(&self, dst: AgentId, msg_id: i64, error: AgentError) -> bool {
        self.wake((dst, msg_id), Err(error))
    }

    /// Fails the waiter of `msg_id` whatever its destination.
    pub fn fail_message(&self, msg_id: i64, error: AgentError) -> bool {
        let key = self.waiters().keys().find(|(_, id)| *id == msg_id).copied();
        key.is_some_and(|key| self.wake(key, Err(error)))
    }

    /// Fails every waiter on `dst` with [`AgentError::RemoteDisconnected`].
    pub fn fail_agent(&self, dst: AgentId) -> usize {
        let drained: Vec<_> = {
            let mut waiters = self.waiters();
            let keys: Vec<Key> = waiters.keys().filter(|(agent, _)| *agent == dst).copied().collect();
            keys.into_iter().filter_map(|key| waiters.remove(&key)).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(AgentError::RemoteDisconnected(dst)));
        }
        count
    }

    /// Fails every waiter with a fresh error from `error`.
    pub fn fail_all(&self, error: impl Fn() -> AgentError) -> usize {
        let drained: Vec<_> = self.waiters().drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(error()));
        }
        count
    }

    /// Number of callers still waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters().len()
    }

    /// Returns `true` if nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters().is_empty()
    }
}
