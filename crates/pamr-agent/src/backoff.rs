use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with ±25% jitter between reconnection attempts.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    /// Creates a backoff starting at `initial` and capped at `max`.
    ///
    /// # Examples
    ///
    /// ```
    /// use pamr_agent::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    /// let mut backoff = ExponentialBackoff::new(
    ///     Duration::from_millis(100),
    ///     Duration::from_millis(5000),
    ///     2.0,
    /// );
    /// let delay = backoff.next_delay();
    /// assert!(delay >= Duration::from_millis(75));
    /// assert!(delay <= Duration::from_millis(125));
    /// ```
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            current: initial,
        }
    }

    /// Builds the backoff described by a [`ReconnectConfig`].
    #[must_use]
    pub const fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_factor,
        )
    }

    /// Returns the next delay and grows the base delay for the call after.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn next_delay(&mut self) -> Duration {
        let base_ms = u64::try_from(self.current.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);

        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        let delay = Duration::from_millis((base_ms as f64 * jitter) as u64);

        let grown = (base_ms as f64 * self.factor) as u64;
        self.current = Duration::from_millis(grown.min(max_ms));
        delay
    }

    /// Goes back to the initial delay, after a tunnel was established.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
