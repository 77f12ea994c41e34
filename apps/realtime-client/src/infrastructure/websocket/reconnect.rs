//! Reconnection Policy
//!
//! Exponential backoff with jitter. The connection client never retries on
//! its own; a supervisor asks this policy for the next delay and hands it to
//! `ConnectionClient::connect_with_backoff`.
//!
//! The un-jittered delay for attempt `n` (1-based) is
//! `min(initial_delay × multiplierⁿ⁻¹, max_delay)`.

use std::time::Duration;

use rand::Rng;

use crate::ReconnectSettings;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on the un-jittered delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Symmetric jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

impl ReconnectConfig {
    /// Jitter applied when building from settings.
    pub const DEFAULT_JITTER: f64 = 0.1;

    /// Build from host settings.
    #[must_use]
    pub const fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.delay_initial,
            max_delay: settings.delay_max,
            multiplier: settings.delay_multiplier,
            jitter_factor: Self::DEFAULT_JITTER,
            max_attempts: settings.max_attempts,
        }
    }

    /// Same parameters without jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Un-jittered delay for a 1-based attempt number.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.initial_delay.as_nanos() as f64 * factor).round();
        #[allow(clippy::cast_precision_loss)]
        let cap = self.max_delay.as_nanos() as f64;
        if !scaled.is_finite() || scaled >= cap {
            return self.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = scaled as u64;
        Duration::from_nanos(nanos)
    }
}

/// Stateful attempt counter producing backoff delays.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use realtime_client::infrastructure::websocket::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let config = ReconnectConfig {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(1),
///     multiplier: 2.0,
///     jitter_factor: 0.0,
///     max_attempts: 0,
/// };
/// let mut policy = ReconnectPolicy::new(config);
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
///
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Create a policy with no attempts made.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Count an attempt and return its delay, or `None` once the attempt
    /// budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt += 1;
        Some(self.jitter(self.config.base_delay(self.attempt)))
    }

    /// Like [`next_delay`](Self::next_delay), reporting a spent budget as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::MaxAttemptsExceeded`] once `max_attempts`
    /// attempts have been made since the last reset.
    pub fn try_next_delay(&mut self) -> Result<Duration, ReconnectError> {
        self.next_delay()
            .ok_or(ReconnectError::MaxAttemptsExceeded(self.attempt))
    }

    /// Forget past attempts after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt < self.config.max_attempts
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn jitter(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 || !factor.is_finite() {
            return delay;
        }
        let spread: f64 = rand::rng().random_range(-factor..=factor);
        let jittered = delay.as_secs_f64() * (1.0 + spread);
        Duration::from_secs_f64(jittered.max(0.001))
    }
}

/// Error type for reconnection failures.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Attempt budget spent.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn config(initial_ms: u64, max_ms: u64, multiplier: f64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn defaults_follow_settings() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 0);
    }

    #[test_case(1, 100 ; "first attempt uses initial delay")]
    #[test_case(2, 200 ; "second doubles")]
    #[test_case(4, 800 ; "fourth")]
    #[test_case(10, 5_000 ; "capped")]
    fn base_delay_schedule(attempt: u32, expected_ms: u64) {
        let config = config(100, 5_000, 2.0, 0);
        assert_eq!(config.base_delay(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let config = config(100, 5_000, 2.0, 0);
        assert_eq!(config.base_delay(u32::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn policy_walks_the_schedule() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 2.0, 0));
        let delays: Vec<_> = (0..4).filter_map(|_| policy.next_delay()).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn attempt_budget_is_enforced() {
        let mut policy = ReconnectPolicy::new(config(100, 1_000, 2.0, 3));
        for expected in 1..=3 {
            assert!(policy.next_delay().is_some());
            assert_eq!(policy.attempt_count(), expected);
        }
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 2.0, 3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let jittered = ReconnectConfig {
            jitter_factor: 0.1,
            ..config(1_000, 10_000, 2.0, 0)
        };
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(jittered.clone());
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn settings_round_trip_into_config() {
        let settings = ReconnectSettings {
            delay_initial: Duration::from_millis(250),
            delay_max: Duration::from_secs(5),
            delay_multiplier: 3.0,
            max_attempts: 7,
        };
        let config = ReconnectConfig::from_settings(&settings).without_jitter();
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.base_delay(2), Duration::from_millis(750));
        assert_eq!(config.max_attempts, 7);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn spent_budget_is_an_error() {
        let mut policy = ReconnectPolicy::new(config(100, 1_000, 2.0, 1));
        assert_eq!(policy.try_next_delay().unwrap(), Duration::from_millis(100));

        let error = policy.try_next_delay().unwrap_err();
        assert!(matches!(error, ReconnectError::MaxAttemptsExceeded(1)));
        assert_eq!(error.to_string(), "maximum reconnection attempts (1) exceeded");
    }
}
