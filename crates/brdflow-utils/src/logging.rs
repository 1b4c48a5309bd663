//! Structured logging for brdflow
//!
//! Every run emits one span per phase carrying `run_id` and `phase`, and every
//! gateway call logs its operation, latency and outcome inside that span.
//! Messages that may carry tool output are redacted before they are logged.

use std::io::IsTerminal;
use tracing::{Level, debug, error, info, span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise verbose mode logs brdflow at debug and
/// everything else at info; the default is brdflow at info and the rest at warn.
/// Logs go to stderr so stdout stays clean for `status --json`.
pub fn init_tracing(verbose: bool, format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("brdflow=debug,info")
            } else {
                EnvFilter::try_new("brdflow=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let span_events = if verbose {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(true)
                        .with_span_events(span_events),
                )
                .try_init()?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(use_color())
                        .with_target(verbose)
                        .with_thread_ids(false)
                        .with_line_number(false)
                        .with_file(false)
                        .with_span_events(span_events)
                        .compact(),
                )
                .try_init()?;
        }
    }

    Ok(())
}

/// Span wrapping a whole run.
pub fn run_span(run_id: &str, platform: &str) -> tracing::Span {
    span!(Level::INFO, "run", run_id = %run_id, platform = %platform)
}

/// Span wrapping one phase execution.
pub fn phase_span(run_id: &str, phase: &str) -> tracing::Span {
    span!(Level::INFO, "phase", run_id = %run_id, phase = %phase)
}

pub fn log_phase_start(run_id: &str, phase: &str) {
    info!(run_id = %run_id, phase = %phase, "Starting phase");
}

pub fn log_phase_complete(run_id: &str, phase: &str, duration_ms: u128) {
    info!(
        run_id = %run_id,
        phase = %phase,
        duration_ms = %duration_ms,
        "Phase completed"
    );
}

/// Log a phase failure. The error text is redacted first.
pub fn log_phase_error(run_id: &str, phase: &str, error: &str, duration_ms: u128) {
    let sanitized = brdflow_redaction::default_redactor()
        .redact_content(error, "<log>")
        .content;

    error!(
        run_id = %run_id,
        phase = %phase,
        duration_ms = %duration_ms,
        error = %sanitized,
        "Phase failed"
    );
}

/// Log a gateway call outcome.
pub fn log_tool_call(operation: &str, tool_call_id: u64, code: i32, latency_ms: u64, attempts: u32) {
    if code == 0 {
        debug!(
            operation = %operation,
            tool_call_id,
            latency_ms,
            attempts,
            "Tool call succeeded"
        );
    } else {
        warn!(
            operation = %operation,
            tool_call_id,
            code,
            latency_ms,
            attempts,
            "Tool call failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_construct_without_subscriber() {
        let span = phase_span("run-1", "parse");
        let _guard = span.enter();
        log_phase_start("run-1", "parse");
        log_phase_complete("run-1", "parse", 12);
        log_phase_error("run-1", "parse", "Bearer abcdefghijklmnopqrstuvwxyz0123", 3);
        log_tool_call("create_issue", 7, 103, 40, 2);
    }

    #[test]
    fn test_default_format_is_compact() {
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }
}
