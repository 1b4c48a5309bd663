//! Centralized retry policy
//!
//! Every gateway call goes through the same policy: transient failures are
//! retried with exponential backoff plus jitter, permanent and client failures
//! are returned immediately. A write that timed out is not retried: the remote
//! side may have applied it, and the caller reconciles instead.

use rand::Rng;
use std::time::Duration;

use brdflow_config::GatewayConfig;
use brdflow_utils::types::ErrorClass;

use crate::operation::Operation;
use crate::result::codes;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter_pct: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            jitter_pct: 15,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            jitter_pct: config.retry_jitter_pct,
        }
    }

    /// Whether a failure with `code` after `attempt` attempts gets another try.
    #[must_use]
    pub fn should_retry(&self, code: i32, attempt: u32) -> bool {
        ErrorClass::from_code(code).is_some_and(|class| class.is_retryable())
            && attempt <= self.max_retries
    }

    /// [`Self::should_retry`] for a specific operation.
    #[must_use]
    pub fn should_retry_call(&self, operation: Operation, code: i32, attempt: u32) -> bool {
        if operation.is_write() && code == codes::TIMEOUT {
            return false;
        }
        self.should_retry(code, attempt)
    }

    /// Backoff before retry number `retry` (1-based) without jitter.
    #[must_use]
    pub fn base_backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Backoff plus up to `jitter_pct` percent of additional delay.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_backoff(retry);
        let max_extra = base.as_millis() as u64 * u64::from(self.jitter_pct) / 100;
        let extra = if max_extra == 0 {
            0
        } else {
            rand::rng().random_range(0..=max_extra)
        };
        base + Duration::from_millis(extra)
    }
}

/// Minimum inter-call delay with symmetric jitter (`base ± pct%`).
#[must_use]
pub fn paced_delay(base_ms: u64, jitter_pct: u8) -> Duration {
    let spread = base_ms * u64::from(jitter_pct) / 100;
    if spread == 0 {
        return Duration::from_millis(base_ms);
    }
    let low = base_ms - spread;
    let high = base_ms + spread;
    Duration::from_millis(rand::rng().random_range(low..=high))
}
