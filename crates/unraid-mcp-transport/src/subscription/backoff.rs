//! Reconnect delay schedule.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential backoff with upward jitter.
///
/// The delay for attempt `n` (0-indexed) is
/// `min(initial * multiplier^n * (1 + jitter), max)` with jitter drawn from
/// `[0, jitter_ratio)`. Because the configuration guarantees
/// `multiplier >= 1 + jitter_ratio`, successive delays never shrink until
/// they reach `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    /// Create a schedule starting at attempt zero.
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The delay for `attempt` with a given jitter sample in `[0, 1)`.
    pub fn delay_for_attempt(&self, attempt: u32, sample: f64) -> Duration {
        let initial = self.config.initial_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();
        let jitter = 1.0 + self.config.jitter_ratio * sample.clamp(0.0, 1.0);
        // Past 2^64 the cap applies anyway.
        let exponent = attempt.min(64) as i32;
        let delay = initial * self.config.backoff_multiplier.powi(exponent) * jitter;
        Duration::from_secs_f64(delay.min(max))
    }

    /// The next delay, advancing the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt, rand::random::<f64>());
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// How long a connection must stream before it counts as healthy.
    pub fn reset_after(&self) -> Duration {
        self.config.reset_after
    }

    /// Start over from the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Record how long the dropped connection had been streaming.
    ///
    /// A connection that stayed up for `reset_after` counts as healthy, so
    /// the next reconnect starts from the initial delay again.
    pub fn connection_dropped(&mut self, streamed_for: Option<Duration>) {
        if streamed_for.is_some_and(|d| d >= self.config.reset_after) {
            self.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.25,
            reset_after: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_first_delay_is_initial() {
        let backoff = Backoff::new(config());
        assert_eq!(backoff.delay_for_attempt(0, 0.0), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = Backoff::new(config());
        assert_eq!(backoff.delay_for_attempt(40, 0.99), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(u32::MAX, 0.5), Duration::from_secs(5));
    }

    #[test]
    fn test_worst_case_jitter_never_decreases() {
        let backoff = Backoff::new(config());
        // Maximum jitter on n against none on n + 1 is the tightest pair.
        for n in 0..20 {
            let high = backoff.delay_for_attempt(n, 0.999_999);
            let low_next = backoff.delay_for_attempt(n + 1, 0.0);
            assert!(low_next >= high, "attempt {n}: {low_next:?} < {high:?}");
        }
    }

    #[test]
    fn test_random_schedule_is_monotonic() {
        for _ in 0..200 {
            let mut backoff = Backoff::new(config());
            let mut previous = Duration::ZERO;
            for _ in 0..16 {
                let delay = backoff.next_delay();
                assert!(delay >= previous);
                assert!(delay <= Duration::from_secs(5));
                previous = delay;
            }
        }
    }

    #[test]
    fn test_reset_after_sustained_streaming() {
        let mut backoff = Backoff::new(config());
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.connection_dropped(Some(Duration::from_secs(5)));
        assert_eq!(backoff.attempt(), 2);

        backoff.connection_dropped(None);
        assert_eq!(backoff.attempt(), 2);

        backoff.connection_dropped(Some(Duration::from_secs(31)));
        assert_eq!(backoff.attempt(), 0);
        assert!(backoff.next_delay() < Duration::from_millis(126));
    }
}
