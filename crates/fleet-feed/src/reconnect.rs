//! # Reconnect Backoff
//!
//! Delay schedule for automatic reconnection.
//!
//! ## Backoff Strategy (Exponential with Jitter)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  base(n)   = min(initial × multiplier^(n−1), max)                       │
//! │  delay(n)  = base(n) ± 25 %   (uniform, floored to whole ms)            │
//! │                                                                         │
//! │  Defaults (initial 1 s, ×2, cap 30 s):                                  │
//! │  Attempt 1:  1 s   (750 ms ..  1.25 s)                                  │
//! │  Attempt 2:  2 s   (1.5 s  ..  2.5 s)                                   │
//! │  Attempt 3:  4 s                                                        │
//! │  Attempt 4:  8 s                                                        │
//! │  Attempt 5: 16 s                                                        │
//! │  Attempt 6+: 30 s  (22.5 s .. 37.5 s)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sampling is delegated to [`backoff::ExponentialBackoff`] with a
//! randomization factor of 0.25; [`ReconnectPolicy::base_delay`] gives the
//! un-jittered value for the same attempt.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

use crate::error::{FeedError, FeedResult};

/// Jitter applied to every delay, as a fraction of the capped base delay.
pub const JITTER_FACTOR: f64 = 0.25;

// =============================================================================
// Reconnect Policy
// =============================================================================

/// Parameters of the exponential backoff curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound of the un-jittered delay.
    pub max_delay: Duration,

    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Un-jittered delay before retry number `attempt` (1-based).
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let raw_ms = initial_ms * self.multiplier.powi(exponent);
        Duration::from_millis(raw_ms.min(max_ms).floor() as u64)
    }

    /// Inclusive range the jittered delay for `attempt` falls in.
    pub fn jitter_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let base_ms = self.base_delay(attempt).as_millis() as f64;
        let low = (base_ms * (1.0 - JITTER_FACTOR)).floor() as u64;
        let high = (base_ms * (1.0 + JITTER_FACTOR)).ceil() as u64;
        (Duration::from_millis(low), Duration::from_millis(high))
    }

    /// Validates the policy.
    pub fn validate(&self) -> FeedResult<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(FeedError::InvalidConfig(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(FeedError::InvalidConfig(format!(
                "max reconnect delay ({} ms) is below the initial delay ({} ms)",
                self.max_delay.as_millis(),
                self.initial_delay.as_millis()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Reconnect Schedule
// =============================================================================

/// Stateful attempt counter plus jittered delay sampler.
pub struct ReconnectSchedule {
    policy: ReconnectPolicy,
    backoff: ExponentialBackoff,
    attempts: u32,
}

impl ReconnectSchedule {
    /// Creates a schedule at attempt 0.
    pub fn new(policy: ReconnectPolicy) -> Self {
        let backoff = ExponentialBackoff {
            current_interval: policy.initial_delay,
            initial_interval: policy.initial_delay,
            randomization_factor: JITTER_FACTOR,
            multiplier: policy.multiplier,
            max_interval: policy.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        };

        ReconnectSchedule {
            policy,
            backoff,
            attempts: 0,
        }
    }

    /// Returns the policy this schedule samples from.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Number of retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Advances to the next attempt and returns `(attempt, delay)`.
    pub fn next_attempt(&mut self) -> (u32, Duration) {
        self.attempts = self.attempts.saturating_add(1);
        // max_elapsed_time is None, so the sampler never runs dry.
        let sampled = self
            .backoff
            .next_backoff()
            .unwrap_or(self.policy.max_delay);
        let delay = Duration::from_millis(sampled.as_millis() as u64);
        (self.attempts, delay)
    }

    /// Returns to attempt 0 and the initial delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.backoff.reset();
    }
}
