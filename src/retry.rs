//! Retry decisions with exponential backoff
//!
//! [`RetryPolicy`] is stateless: given how many attempts an item has made and
//! the error of the last one, it says whether to try again and how long to wait.
//! The executor owns the loop; the policy only decides.
//!
//! ```
//! use crawl_orchestrator::config::RetryConfig;
//! use crawl_orchestrator::error::WorkError;
//! use crawl_orchestrator::retry::{RetryDecision, RetryPolicy};
//! use std::time::Duration;
//!
//! let config = RetryConfig { jitter: false, ..RetryConfig::default() };
//! let policy = RetryPolicy::new(config, 4);
//!
//! assert_eq!(
//!     policy.decide(1, &WorkError::Timeout),
//!     RetryDecision::RetryAfter(Duration::from_secs(1))
//! );
//! assert_eq!(policy.decide(4, &WorkError::Timeout), RetryDecision::GiveUp);
//! assert_eq!(
//!     policy.decide(1, &WorkError::Permanent("bad url".into())),
//!     RetryDecision::GiveUp
//! );
//! ```

use crate::config::RetryConfig;
use crate::error::WorkError;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, server busy) return `true`.
/// Permanent failures (malformed target, rejected request) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for WorkError {
    fn is_retryable(&self) -> bool {
        match self {
            WorkError::Timeout | WorkError::Connection(_) => true,
            WorkError::Permanent(_) | WorkError::Cancelled => false,
        }
    }
}

/// What to do after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given delay, then attempt again
    RetryAfter(Duration),
    /// Settle the item as failed
    GiveUp,
}

/// Backoff and attempt-limit policy for one task's items
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    max_attempts: u32,
}

impl RetryPolicy {
    /// Build a policy allowing at most `max_attempts` attempts per item
    pub fn new(config: RetryConfig, max_attempts: u32) -> Self {
        Self {
            config,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Attempts allowed per item, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide after `attempts_made` attempts, the last of which failed with `error`
    pub fn decide<E: IsRetryable>(&self, attempts_made: u32, error: &E) -> RetryDecision {
        if !error.is_retryable() || attempts_made >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let delay = self.backoff_delay(attempts_made);
        if self.config.jitter {
            RetryDecision::RetryAfter(add_jitter(delay))
        } else {
            RetryDecision::RetryAfter(delay)
        }
    }

    /// Un-jittered delay after `attempts_made` attempts
    ///
    /// `initial_delay * multiplier^(attempts_made - 1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.config.initial_delay.as_secs_f64()
            * self.config.backoff_multiplier.max(1.0).powi(exponent);
        let max = self.config.max_delay;

        if !secs.is_finite() || secs >= max.as_secs_f64() {
            return max;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Add random jitter to a delay to spread out retries against the same target
///
/// Jitter is uniformly distributed between 0% and 25% of the delay.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=0.25);
    delay.mul_f64(1.0 + jitter_factor)
}
