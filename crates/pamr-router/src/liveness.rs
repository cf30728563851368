//! Periodic heartbeat and eviction sweeps.

use crate::metrics::{counters, gauges};
use crate::server::RouterState;
use pamr_common::{AgentId, Frame};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

/// Sweeps run three times per timeout period.
const SWEEPS_PER_PERIOD: u32 = 3;

fn sweep_period(timeout: Duration) -> Duration {
    (timeout / SWEEPS_PER_PERIOD).max(Duration::from_millis(1))
}

/// Starts the heartbeat sweep and, if eviction is enabled, the eviction sweep.
///
/// Both tasks stop when `shutdown` fires.
pub fn spawn(state: Arc<RouterState>, shutdown: watch::Receiver<()>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(2);

    let period = sweep_period(state.config.heartbeat_timeout);
    handles.push(tokio::spawn(periodic(
        Arc::clone(&state),
        shutdown.clone(),
        period,
        |state, now| {
            heartbeat_sweep(state, now);
        },
    )));

    if let Some(evict) = state.config.evict_timeout {
        let period = sweep_period(evict);
        handles.push(tokio::spawn(periodic(state, shutdown, period, |state, now| {
            evict_sweep(state, now);
        })));
    }

    handles
}

async fn periodic<F>(
    state: Arc<RouterState>,
    mut shutdown: watch::Receiver<()>,
    period: Duration,
    sweep: F,
) where
    F: Fn(&RouterState, Instant) + Send + 'static,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => sweep(&state, Instant::now()),
            _ = shutdown.changed() => return,
        }
    }
}

/// Pings every connected agent and disconnects the silent ones.
///
/// Returns the agents whose heartbeat timed out.
pub fn heartbeat_sweep(state: &RouterState, now: Instant) -> Vec<AgentId> {
    let timeout = state.config.heartbeat_timeout;
    let heartbeat = Frame::heartbeat_router(state.next_heartbeat_id()).serialize();
    let mut expired = Vec::new();
    let mut sent = 0u64;

    for client in state.sessions.snapshot() {
        if client.detach_if_expired(now, timeout) {
            expired.push(client.agent_id());
            continue;
        }
        if client.is_connected() && client.send(heartbeat.clone()) {
            sent += 1;
        }
    }
    counters::heartbeats_sent_total(sent);

    for &agent in &expired {
        info!(agent = %agent, "heartbeat timeout, disconnecting agent");
        counters::disconnections_total("heartbeat_timeout");
        state.broadcast_disconnection(agent);
    }
    expired
}

/// Forgets dynamic agents that stayed disconnected for the eviction timeout.
///
/// Returns the evicted agents. Does nothing when eviction is disabled.
pub fn evict_sweep(state: &RouterState, now: Instant) -> Vec<AgentId> {
    let Some(timeout) = state.config.evict_timeout else {
        return Vec::new();
    };

    let evicted: Vec<AgentId> = state
        .sessions
        .snapshot()
        .into_iter()
        .filter_map(|client| {
            state
                .sessions
                .remove_if(&client.agent_id(), |c| c.evictable(now, timeout))
                .map(|c| c.agent_id())
        })
        .collect();

    if evicted.is_empty() {
        return evicted;
    }
    for agent in &evicted {
        debug!(agent = %agent, "agent evicted");
    }
    info!(count = evicted.len(), "evicted disconnected agents");
    counters::evictions_total(evicted.len() as u64);
    gauges::sessions(state.sessions.len());
    evicted
}
