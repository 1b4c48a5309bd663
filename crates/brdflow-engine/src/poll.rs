//! Readiness polling
//!
//! Newly created projects and work items may not be readable immediately.
//! [`PollPolicy`] bounds how long the orchestrator waits for them: the delay
//! starts at `poll_initial_delay_ms` and doubles per attempt, for at most
//! `max_poll_attempts` attempts or `poll_bound_ms` of elapsed time, probe
//! latency included.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use brdflow_config::CreationConfig;
use brdflow_utils::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_attempts: u32,
    pub bound: Duration,
}

/// Answer of one readiness probe.
pub enum Probe<T> {
    Ready(T),
    /// Not visible yet; keep polling.
    Pending,
}

impl PollPolicy {
    #[must_use]
    pub fn from_config(config: &CreationConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.poll_initial_delay_ms),
            max_attempts: config.max_poll_attempts.max(1),
            bound: Duration::from_millis(config.poll_bound_ms),
        }
    }

    /// Delay before the 1-based `attempt`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(factor)
    }

    /// Probe until ready, the attempts run out or the time bound is reached.
    ///
    /// Returns `Ok(None)` when the entity never became ready.
    ///
    /// # Errors
    ///
    /// The first probe error, which ends polling immediately.
    pub async fn run<T, F, Fut>(&self, mut probe: F) -> Result<Option<T>, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Probe<T>, GatewayError>>,
    {
        let started = Instant::now();
        for attempt in 1..=self.max_attempts {
            let remaining = self.bound.saturating_sub(started.elapsed());
            let delay = self.delay(attempt).min(remaining);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if let Probe::Ready(value) = probe(attempt).await? {
                return Ok(Some(value));
            }
            let elapsed = started.elapsed();
            if elapsed >= self.bound {
                tracing::debug!(attempt, elapsed_ms = elapsed.as_millis() as u64, "Readiness poll bound reached");
                break;
            }
        }
        Ok(None)
    }
}
