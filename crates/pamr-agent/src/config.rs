use pamr_common::types::DEFAULT_PORT;
use pamr_common::{AgentId, MagicCookie};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Reconnect backoff parameters.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnect attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnect attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

/// Settings of one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Router to register with.
    pub router: SocketAddr,
    /// Cookie proving ownership of the agent id across reconnections.
    pub cookie: MagicCookie,
    /// Pre-assigned reserved id; `None` lets the router allocate one.
    pub agent_id: Option<AgentId>,
    /// Backoff between reconnection attempts.
    pub reconnect: ReconnectConfig,
    /// Time allowed to connect and receive the registration reply.
    pub handshake_timeout: Duration,
    /// Capacity of the outbound frame queue.
    pub outbound_queue: usize,
}

impl AgentConfig {
    /// Configuration for a dynamic agent with a random cookie.
    #[must_use]
    pub fn new(router: SocketAddr) -> Self {
        Self {
            router,
            cookie: MagicCookie::random(),
            agent_id: None,
            reconnect: ReconnectConfig::default(),
            handshake_timeout: Duration::from_secs(10),
            outbound_queue: 256,
        }
    }

    /// Configuration for a reserved agent.
    #[must_use]
    pub fn reserved(router: SocketAddr, agent_id: AgentId, cookie: MagicCookie) -> Self {
        Self {
            agent_id: Some(agent_id),
            cookie,
            ..Self::new(router)
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.agent_id.is_some_and(|id| !id.is_reserved()) {
            return Err("only reserved agent ids can be pre-assigned".to_string());
        }
        if self.handshake_timeout.is_zero() {
            return Err("handshake_timeout must be greater than 0".to_string());
        }
        if self.outbound_queue == 0 {
            return Err("outbound_queue must be greater than 0".to_string());
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err("reconnect.initial_delay_ms must be greater than 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err("reconnect.max_delay_ms must be >= initial_delay_ms".to_string());
        }
        let factor = self.reconnect.backoff_factor;
        if factor.is_nan() || factor < 1.0 {
            return Err("reconnect.backoff_factor must be >= 1.0".to_string());
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)))
    }
}
