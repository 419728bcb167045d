//! Reconnect timing parameters.
//!
//! The broadcaster uses the policy to time the `ChannelError -> Reconnecting`
//! marker and to bound how many consecutive error rounds it reflects; the
//! websocket transport uses the same policy to pace socket reconnects.
//!
//! The defaults reproduce the dashboard's behavior: a fixed 2 second delay,
//! no backoff, no jitter and no retry cap.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RealtimeError, Result};

/// Default delay before marking a failed channel as reconnecting.
pub const DEFAULT_DELAY_MS: u64 = 2_000;
/// Default upper bound for a backed-off delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default backoff multiplier (1.0 = fixed delay).
pub const DEFAULT_BACKOFF: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    /// Consecutive failed rounds allowed before giving up (None = forever)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Jitter range 0.0-1.0 applied symmetrically around the delay
    #[serde(default)]
    pub jitter: f64,
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_backoff() -> f64 {
    DEFAULT_BACKOFF
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff: DEFAULT_BACKOFF,
            max_attempts: None,
            jitter: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay, unbounded attempts
    pub fn fixed(delay: Duration) -> Self {
        let delay_ms = delay.as_millis() as u64;
        Self {
            delay_ms,
            max_delay_ms: delay_ms.max(DEFAULT_MAX_DELAY_MS),
            ..Self::default()
        }
    }

    /// Exponential backoff from `delay` up to `max_delay`
    pub fn exponential(delay: Duration, max_delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            delay_ms: delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            backoff: 2.0,
            max_attempts,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.backoff.is_finite() || self.backoff < 1.0 {
            return Err(RealtimeError::InvalidPolicy(format!(
                "backoff must be a finite value >= 1.0, got {}",
                self.backoff
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(RealtimeError::InvalidPolicy(format!(
                "jitter must be within 0.0..=1.0, got {}",
                self.jitter
            )));
        }
        if self.max_delay_ms < self.delay_ms {
            return Err(RealtimeError::InvalidPolicy(format!(
                "max_delay_ms ({}) is smaller than delay_ms ({})",
                self.max_delay_ms, self.delay_ms
            )));
        }
        Ok(())
    }

    /// Whether a retry with zero-based index `attempt` is permitted
    pub fn allows(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }

    /// Delay before the retry with zero-based index `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let random = if self.jitter > 0.0 { rand::random::<f64>() } else { 0.5 };
        self.delay_with_random(attempt, random)
    }

    /// Same as [`delay_for`](Self::delay_for) with an explicit random value in `[0.0, 1.0)`
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        let exponent = attempt.min(31) as i32;
        let scaled = self.delay_ms as f64 * self.backoff.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64);

        // Maps random [0,1) to [-jitter, +jitter]
        let factor = 1.0 + (random * 2.0 - 1.0) * self.jitter;
        Duration::from_millis((capped * factor).round().max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_two_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(7), Duration::from_secs(2));
        assert!(policy.allows(10_000));
        policy.validate().unwrap();
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_millis(1_000),
            Duration::from_millis(10_000),
            None,
        );
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(1_000)).with_jitter(0.2);
        assert_eq!(policy.delay_with_random(0, 0.0), Duration::from_millis(800));
        assert_eq!(policy.delay_with_random(0, 0.5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_with_random(0, 0.999_999), Duration::from_millis(1_200));

        for _ in 0..50 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1_200));
        }
    }

    #[test]
    fn test_max_attempts() {
        let policy = ReconnectPolicy::default().with_max_attempts(3);
        assert!(policy.allows(0));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut policy = ReconnectPolicy::default();
        policy.backoff = f64::NAN;
        assert!(matches!(policy.validate(), Err(RealtimeError::InvalidPolicy(_))));

        // Shrinking delays are rejected along with negative ones
        for backoff in [-1.0, 0.0, 0.5, f64::INFINITY] {
            policy.backoff = backoff;
            assert!(policy.validate().is_err(), "backoff {} should be rejected", backoff);
        }
        policy.backoff = 1.0;
        policy.validate().unwrap();

        let policy = ReconnectPolicy::default().with_jitter(1.5);
        assert!(policy.validate().is_err());

        let mut policy = ReconnectPolicy::default();
        policy.max_delay_ms = 10;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: ReconnectPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.delay_ms, DEFAULT_DELAY_MS);
        assert_eq!(policy.backoff, DEFAULT_BACKOFF);
        assert_eq!(policy.max_attempts, Some(5));
    }
}
