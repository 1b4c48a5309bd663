//! Tool gateway
//!
//! [`ToolGateway`] wraps a [`ToolTransport`] with the behavior every remote call
//! shares: a jittered minimum delay before each call, a per-call timeout, the
//! centralized [`RetryPolicy`], monotonically increasing tool call ids and a
//! redacted trace of every call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use brdflow_config::GatewayConfig;
use brdflow_redaction::SecretRedactor;
use brdflow_utils::error::GatewayError;
use brdflow_utils::logging::log_tool_call;
use brdflow_utils::types::Platform;

use crate::operation::Operation;
use crate::result::{ToolOutcome, ToolResult, ToolStatus, codes};
use crate::retry::{RetryPolicy, paced_delay};

/// A connection to one tracker tool server.
///
/// Implementations perform exactly one round trip per call. Transport-level
/// failures (broken pipe, connection refused) are returned as `Err` and are
/// treated as transient by the gateway.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call(
        &self,
        operation: Operation,
        arguments: &Value,
        tool_call_id: u64,
    ) -> Result<ToolOutcome, GatewayError>;

    /// Short name for logs ("stdio", "http", "mock").
    fn name(&self) -> &'static str;
}

/// One traced tool call. Payload and response are redacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub tool_call_id: u64,
    pub operation: Operation,
    pub payload: Value,
    pub response: Value,
    pub code: i32,
    pub attempts: u32,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Pacing and timeout settings applied around every call.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub min_wait: Duration,
    pub rate_jitter_pct: u8,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl GatewaySettings {
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            min_wait: Duration::from_millis(config.min_wait_before_call_ms),
            rate_jitter_pct: config.rate_jitter_pct,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            retry: RetryPolicy::from_config(config),
        }
    }
}

pub struct ToolGateway {
    platform: Platform,
    transport: Box<dyn ToolTransport>,
    settings: GatewaySettings,
    next_id: AtomicU64,
    trace: Mutex<Vec<TraceEntry>>,
    redactor: SecretRedactor,
}

impl ToolGateway {
    #[must_use]
    pub fn new(
        platform: Platform,
        transport: Box<dyn ToolTransport>,
        settings: GatewaySettings,
        redactor: SecretRedactor,
    ) -> Self {
        Self {
            platform,
            transport,
            settings,
            next_id: AtomicU64::new(1),
            trace: Mutex::new(Vec::new()),
            redactor,
        }
    }

    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Continue numbering after `last_id`, so resumed runs never reuse ids.
    pub fn resume_ids_after(&self, last_id: u64) {
        self.next_id.fetch_max(last_id + 1, Ordering::SeqCst);
    }

    /// The id the next call will receive.
    #[must_use]
    pub fn peek_next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Invoke `operation`, applying pacing, timeout and retries.
    ///
    /// Never returns `Err`: every failure is normalized into the result code.
    pub async fn invoke(&self, operation: Operation, payload: Value) -> ToolResult {
        let tool_call_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let mut attempt = 0u32;

        let outcome = loop {
            attempt += 1;

            let wait = paced_delay(
                self.settings.min_wait.as_millis() as u64,
                self.settings.rate_jitter_pct,
            );
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            let outcome = match tokio::time::timeout(
                self.settings.call_timeout,
                self.transport.call(operation, &payload, tool_call_id),
            )
            .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => ToolOutcome::error(err.code(), err.to_string()),
                Err(_) => ToolOutcome::error(
                    codes::TIMEOUT,
                    format!(
                        "{operation} exceeded {}ms",
                        self.settings.call_timeout.as_millis()
                    ),
                ),
            };

            if outcome.code == codes::OK
                || !self.settings.retry.should_retry_call(operation, outcome.code, attempt)
            {
                break outcome;
            }

            let delay = self.settings.retry.backoff(attempt);
            tracing::debug!(
                operation = %operation,
                tool_call_id,
                attempt,
                code = outcome.code,
                delay_ms = delay.as_millis() as u64,
                "Retrying transient tool failure"
            );
            tokio::time::sleep(delay).await;
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        log_tool_call(operation.name(), tool_call_id, outcome.code, latency_ms, attempt);

        let response = match &outcome.error {
            Some(message) => serde_json::json!({ "error": message }),
            None => outcome.data.clone(),
        };
        self.record_trace(TraceEntry {
            tool_call_id,
            operation,
            payload: self.redactor.redact_json(&payload),
            response: self.redactor.redact_json(&response),
            code: outcome.code,
            attempts: attempt,
            latency_ms,
            timestamp: Utc::now(),
        });

        ToolResult {
            operation,
            status: if outcome.code == codes::OK {
                ToolStatus::Ok
            } else {
                ToolStatus::Error
            },
            code: outcome.code,
            data: outcome.data,
            error: outcome.error,
            tool_call_id,
            attempts: attempt,
            latency_ms,
        }
    }

    /// Invoke and convert a failed result into a classified [`GatewayError`].
    pub async fn call(&self, operation: Operation, payload: Value) -> Result<Value, GatewayError> {
        self.invoke(operation, payload).await.into_data()
    }

    fn record_trace(&self, entry: TraceEntry) {
        if let Ok(mut trace) = self.trace.lock() {
            trace.push(entry);
        }
    }

    /// Take the trace entries recorded since the last drain.
    pub fn drain_trace(&self) -> Vec<TraceEntry> {
        match self.trace.lock() {
            Ok(mut trace) => std::mem::take(&mut *trace),
            Err(_) => Vec::new(),
        }
    }

    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    /// Fails with `code` for the first `failures` calls, then succeeds.
    struct Flaky {
        code: i32,
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ToolTransport for Flaky {
        async fn call(
            &self,
            _operation: Operation,
            _arguments: &Value,
            tool_call_id: u64,
        ) -> Result<ToolOutcome, GatewayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Ok(ToolOutcome::error(self.code, "upstream said no"))
            } else {
                Ok(ToolOutcome::ok(json!({"echo": tool_call_id})))
            }
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    struct Hangs;

    #[async_trait]
    impl ToolTransport for Hangs {
        async fn call(&self, _: Operation, _: &Value, _: u64) -> Result<ToolOutcome, GatewayError> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "hangs"
        }
    }

    fn fast_settings() -> GatewaySettings {
        GatewaySettings {
            min_wait: Duration::ZERO,
            rate_jitter_pct: 0,
            call_timeout: Duration::from_millis(50),
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                jitter_pct: 15,
            },
        }
    }

    fn gateway(transport: Box<dyn ToolTransport>) -> ToolGateway {
        ToolGateway::new(Platform::Jira, transport, fast_settings(), SecretRedactor::default())
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let gw = gateway(Box::new(Flaky {
            code: codes::RATE_LIMITED,
            failures: 2,
            calls: calls.clone(),
        }));

        let result = gw.invoke(Operation::GetIssue, json!({"key": "P-1"})).await;
        assert!(result.is_ok());
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let gw = gateway(Box::new(Flaky {
            code: codes::UPSTREAM_UNAVAILABLE,
            failures: 10,
            calls: calls.clone(),
        }));

        let result = gw.invoke(Operation::CreateIssue, json!({})).await;
        assert_eq!(result.code, codes::UPSTREAM_UNAVAILABLE);
        assert_eq!(result.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_and_client_not_retried() {
        for code in [codes::REJECTED, codes::NOT_FOUND] {
            let calls = Arc::new(AtomicU32::new(0));
            let gw = gateway(Box::new(Flaky {
                code,
                failures: 10,
                calls: calls.clone(),
            }));
            let result = gw.invoke(Operation::CreateProject, json!({})).await;
            assert_eq!(result.code, code);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let gw = gateway(Box::new(Hangs));
        let result = gw.invoke(Operation::GetProject, json!({})).await;
        assert_eq!(result.code, codes::TIMEOUT);
        assert_eq!(result.attempts, 4);
    }

    #[tokio::test]
    async fn test_timed_out_write_not_retried() {
        let gw = gateway(Box::new(Hangs));
        let result = gw.invoke(Operation::CreateIssue, json!({})).await;
        assert_eq!(result.code, codes::TIMEOUT);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_ids_monotonic_and_resumable() {
        let gw = gateway(Box::new(Flaky {
            code: 0,
            failures: 0,
            calls: Arc::new(AtomicU32::new(0)),
        }));
        let a = gw.invoke(Operation::Authenticate, json!({})).await;
        let b = gw.invoke(Operation::GetAllProjects, json!({})).await;
        assert_eq!((a.tool_call_id, b.tool_call_id), (1, 2));
        assert_eq!(b.data["echo"], 2);

        gw.resume_ids_after(40);
        let c = gw.invoke(Operation::ClearSession, json!({})).await;
        assert_eq!(c.tool_call_id, 41);

        // Never moves backwards
        gw.resume_ids_after(5);
        assert_eq!(gw.peek_next_id(), 42);
    }

    #[tokio::test]
    async fn test_trace_is_redacted_and_drained() {
        let gw = gateway(Box::new(Flaky {
            code: 0,
            failures: 0,
            calls: Arc::new(AtomicU32::new(0)),
        }));
        gw.invoke(Operation::Authenticate, json!({"access_token": "abc123def456ghi789"}))
            .await;

        let trace = gw.drain_trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].operation, Operation::Authenticate);
        assert!(!trace[0].payload.to_string().contains("abc123def456ghi789"));
        assert!(gw.drain_trace().is_empty());
    }
}
