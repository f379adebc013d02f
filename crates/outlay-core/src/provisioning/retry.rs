//! Exponential backoff for provisioning retries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How failed user inserts are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of insert attempts, counting the one made while the
    /// webhook was being handled.
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each later attempt.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) applied to each delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(3600),
            jitter_factor: 0.1,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again at the given time.
    Retry {
        /// When the next attempt may run
        next_attempt_at: DateTime<Utc>,
    },
    /// Stop retrying.
    GiveUp {
        /// Why no further attempt is made
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides whether attempt number `attempts_made + 1` should happen.
    pub fn decide(&self, attempts_made: u32, failed_at: DateTime<Utc>) -> RetryDecision {
        if attempts_made >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts),
            };
        }

        let Ok(delay) = chrono::Duration::from_std(self.delay_after(attempts_made)) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        match failed_at.checked_add_signed(delay) {
            Some(next_attempt_at) => RetryDecision::Retry { next_attempt_at },
            None => RetryDecision::GiveUp { reason: "retry time out of range".to_string() },
        }
    }

    /// Delay to wait after `attempts_made` failed attempts, with jitter.
    pub fn delay_after(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(20);
        let base = self.base_delay.saturating_mul(2_u32.saturating_pow(exponent));
        let capped = base.min(self.max_delay);

        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }
}

/// Randomizes a delay by up to ±`jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let jitter_range = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::rng().random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}
