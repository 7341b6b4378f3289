//! Reconnect delay computation.

use crate::config::{BackoffConfig, ReconnectStrategy};
use std::time::Duration;

/// Exponential backoff state.
///
/// The delay is a pure function of the attempt count: `initial *
/// multiplier^attempt`, capped at the maximum. No jitter is applied.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
    current: Duration,
}

impl ExponentialBackoff {
    /// Creates a backoff starting at attempt zero.
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay.min(config.max_delay);
        Self {
            config,
            attempt: 0,
            current,
        }
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        let max = self.config.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.config.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Returns the delay to wait now and advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        self.current = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.current
    }

    /// Resets to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current = self.config.initial_delay.min(self.config.max_delay);
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The most recently computed delay.
    pub fn current_delay(&self) -> Duration {
        self.current
    }
}

/// Delay source for the reconnect loop.
#[derive(Debug, Clone)]
pub(crate) enum ReconnectDelay {
    Fixed { delay: Duration, attempt: u32 },
    Exponential(ExponentialBackoff),
}

impl ReconnectDelay {
    pub(crate) fn new(strategy: &ReconnectStrategy) -> Self {
        match strategy {
            ReconnectStrategy::Fixed(delay) => ReconnectDelay::Fixed {
                delay: *delay,
                attempt: 0,
            },
            ReconnectStrategy::Exponential(config) => {
                ReconnectDelay::Exponential(ExponentialBackoff::new(config.clone()))
            }
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        match self {
            ReconnectDelay::Fixed { delay, attempt } => {
                *attempt = attempt.saturating_add(1);
                *delay
            }
            ReconnectDelay::Exponential(backoff) => backoff.next_delay(),
        }
    }

    pub(crate) fn attempt(&self) -> u32 {
        match self {
            ReconnectDelay::Fixed { attempt, .. } => *attempt,
            ReconnectDelay::Exponential(backoff) => backoff.attempt(),
        }
    }

    pub(crate) fn reset(&mut self) {
        match self {
            ReconnectDelay::Fixed { attempt, .. } => *attempt = 0,
            ReconnectDelay::Exponential(backoff) => backoff.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_ceiling() {
        let mut backoff = ExponentialBackoff::new(BackoffConfig::default());
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(backoff.attempt(), 8);
        assert_eq!(backoff.current_delay(), Duration::from_secs(60));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = ExponentialBackoff::new(BackoffConfig::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn delay_is_pure_function_of_attempt() {
        let backoff = ExponentialBackoff::new(
            BackoffConfig::default()
                .with_initial_delay(Duration::from_millis(100))
                .with_multiplier(3.0)
                .with_max_delay(Duration::from_secs(2)),
        );
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(900));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_attempt(2), backoff.delay_for_attempt(2));
    }

    #[test]
    fn fixed_strategy_counts_attempts() {
        let mut delay = ReconnectDelay::new(&ReconnectStrategy::Fixed(Duration::from_millis(20)));
        assert_eq!(delay.next_delay(), Duration::from_millis(20));
        assert_eq!(delay.next_delay(), Duration::from_millis(20));
        assert_eq!(delay.attempt(), 2);
        delay.reset();
        assert_eq!(delay.attempt(), 0);
    }
}
