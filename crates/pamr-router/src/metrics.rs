use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Installs the Prometheus recorder and serves `/metrics` on `addr`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or the listener
/// cannot be bound.
pub fn install_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint listening on {}", addr);
    Ok(())
}

/// Connection and session gauges.
pub mod gauges {
    /// Increment the open tunnels gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("pamr_connections_active").increment(1.0);
    }

    /// Decrement the open tunnels gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("pamr_connections_active").decrement(1.0);
    }

    /// Record the current number of known agents.
    #[allow(clippy::cast_precision_loss)]
    pub fn sessions(count: usize) {
        metrics::gauge!("pamr_sessions").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Record a registration attempt with the given outcome label.
    pub fn registrations_total(outcome: &'static str) {
        metrics::counter!("pamr_registrations_total", "outcome" => outcome).increment(1);
    }

    /// Increment the forwarded-frames counter for a data frame kind.
    pub fn frames_forwarded_total(kind: &'static str) {
        metrics::counter!("pamr_frames_forwarded_total", "kind" => kind).increment(1);
    }

    /// Increment the dropped-frames counter with the given reason label.
    pub fn frames_dropped_total(reason: &'static str) {
        metrics::counter!("pamr_frames_dropped_total", "reason" => reason).increment(1);
    }

    /// Increment the error-notification counter for an error kind.
    pub fn errors_sent_total(kind: &'static str) {
        metrics::counter!("pamr_errors_sent_total", "kind" => kind).increment(1);
    }

    /// Increment the cached-frames counter.
    pub fn frames_cached_total() {
        metrics::counter!("pamr_frames_cached_total").increment(1);
    }

    /// Increment the counter of cached frames lost to the cache bound.
    pub fn cache_overflow_total() {
        metrics::counter!("pamr_cache_overflow_total").increment(1);
    }

    /// Record a failed non-blocking send with the given reason label.
    pub fn send_failures_total(reason: &'static str) {
        metrics::counter!("pamr_send_failures_total", "reason" => reason).increment(1);
    }

    /// Record an agent losing its tunnel, by cause.
    pub fn disconnections_total(cause: &'static str) {
        metrics::counter!("pamr_disconnections_total", "cause" => cause).increment(1);
    }

    /// Increment the evicted-agents counter.
    pub fn evictions_total(count: u64) {
        metrics::counter!("pamr_evictions_total").increment(count);
    }

    /// Increment the malformed-frames counter.
    pub fn malformed_frames_total() {
        metrics::counter!("pamr_malformed_frames_total").increment(1);
    }

    /// Increment the router heartbeats counter.
    pub fn heartbeats_sent_total(count: u64) {
        metrics::counter!("pamr_heartbeats_sent_total").increment(count);
    }

    /// Record an admin operation with the given outcome label.
    pub fn admin_ops_total(op: &'static str, outcome: &'static str) {
        metrics::counter!("pamr_admin_ops_total", "op" => op, "outcome" => outcome).increment(1);
    }
}
