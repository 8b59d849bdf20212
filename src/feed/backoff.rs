//! Reconnect backoff for upstream feeds.
//!
//! Exponential backoff capped at a maximum, with optional subtractive
//! jitter so that jittered delays never exceed the nominal delay or the
//! cap.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnect delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Fraction in `[0, 1]` by which a delay may be shortened at random.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Nominal delay for the given attempt: `min(base * 2^attempt, max)`.
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Attempt counter paired with its [`BackoffConfig`].
///
/// Reset to attempt 0 after every successful connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff at attempt 0.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Returns the delay for the current attempt and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.config.nominal_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.apply_jitter(nominal)
    }

    /// Resets the attempt counter after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    fn apply_jitter(&self, nominal: Duration) -> Duration {
        // NaN survives `clamp` and would poison the delay.
        if !self.config.jitter.is_finite() || self.config.jitter <= 0.0 {
            return nominal;
        }
        let jitter = self.config.jitter.min(1.0);
        let roll: f64 = rand::rng().random();
        Duration::try_from_secs_f64(nominal.as_secs_f64() * (1.0 - jitter * roll)).unwrap_or(nominal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_ms: u64, max_ms: u64, jitter: f64) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter,
        }
    }

    #[test]
    fn default_config_values() {
        let config = BackoffConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.jitter - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn doubles_until_capped() {
        let mut backoff = Backoff::new(config(100, 1_000, 0.0));
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let mut backoff = Backoff::new(config(7, 5_000, 0.0));
        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let delay = backoff.next_delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(5_000));
            previous = delay;
        }
    }

    #[test]
    fn huge_attempt_counts_saturate_at_cap() {
        let config = config(500, 30_000, 0.0);
        assert_eq!(config.nominal_delay(31), Duration::from_secs(30));
        assert_eq!(config.nominal_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::new(config(100, 10_000, 0.0));
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn non_finite_jitter_falls_back_to_nominal() {
        for jitter in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut backoff = Backoff::new(config(100, 1_000, jitter));
            assert_eq!(backoff.next_delay(), Duration::from_millis(100));
            assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        }
    }

    #[test]
    fn out_of_range_jitter_is_clamped() {
        for _ in 0..100 {
            let mut backoff = Backoff::new(config(1_000, 10_000, 7.5));
            assert!(backoff.next_delay() <= Duration::from_millis(1_000));
        }
        let mut negative = Backoff::new(config(1_000, 10_000, -0.5));
        assert_eq!(negative.next_delay(), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut backoff = Backoff::new(config(1_000, 10_000, 0.1));
            let millis = backoff.next_delay().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1_000, "delay {millis}ms is above nominal 1000ms");
        }
    }
}
