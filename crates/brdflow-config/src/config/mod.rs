//! Configuration management for brdflow
//!
//! Hierarchical configuration with discovery and precedence: CLI > file >
//! defaults. TOML files carry `[gateway]`, `[creation]`, `[parse]`, `[gates]`,
//! `[discovery]` and `[security]` sections.

mod builder;
mod cli_args;
mod discovery;
mod model;
mod sources;
mod validation;

pub use builder::ConfigBuilder;
pub use cli_args::CliArgs;
pub use model::*;
pub use brdflow_utils::types::ConfigSource;

/// Keys tracked in `source_attribution` and shown by `config --show`.
pub(crate) const ATTRIBUTED_KEYS: &[&str] = &[
    "max_retries",
    "call_timeout_ms",
    "min_wait_before_call_ms",
    "rate_jitter_pct",
    "retry_base_delay_ms",
    "retry_jitter_pct",
    "transport",
    "poll_initial_delay_ms",
    "max_poll_attempts",
    "poll_bound_ms",
    "compensation_threshold_pct",
    "compensation_policy",
    "verify_not_found_attempts",
    "verify_batch_threshold",
    "confidence_threshold",
    "retry_floor",
    "gate_timeout_s",
    "project_type",
    "region",
];

impl brdflow_redaction::SecretConfigProvider for Config {
    fn extra_secret_patterns(&self) -> &[String] {
        &self.security.extra_secret_patterns
    }

    fn ignore_secret_patterns(&self) -> &[String] {
        &self.security.ignore_secret_patterns
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Config {
    /// Config with no pacing and millisecond-scale polling, for tests.
    #[must_use]
    pub fn for_tests() -> Self {
        let mut config = Self::defaults();
        config.gateway.min_wait_before_call_ms = 0;
        config.gateway.retry_base_delay_ms = 1;
        config.gateway.call_timeout_ms = 2_000;
        config.creation.poll_initial_delay_ms = 1;
        config.creation.poll_bound_ms = 200;
        config.gates.gate_timeout_s = 300;
        config
    }
}
