use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use brdflow_utils::types::ConfigSource;

/// Tool server transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Line-delimited JSON-RPC over a child process's stdin/stdout.
    #[default]
    Stdio,
    /// JSON-RPC over HTTP POST.
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            other => Err(format!("must be 'stdio' or 'http', got '{other}'")),
        }
    }
}

/// What to do with a creation batch whose failure ratio crossed the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationPolicy {
    /// Delete this run's successful creations in the failed batch where safe.
    Delete,
    /// Leave remote items in place and mark the run partial.
    #[default]
    MarkPartial,
}

impl std::fmt::Display for CompensationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::MarkPartial => write!(f, "mark_partial"),
        }
    }
}

impl std::str::FromStr for CompensationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delete" => Ok(Self::Delete),
            "mark_partial" => Ok(Self::MarkPartial),
            other => Err(format!("must be 'delete' or 'mark_partial', got '{other}'")),
        }
    }
}

/// Configuration for brdflow runs.
///
/// `Config` layers CLI arguments over a TOML file over built-in defaults.
///
/// # Discovery
///
/// [`Config::discover()`] searches for `.brdflow/config.toml` upward from the
/// current directory, stopping at a repository root.
///
/// # Configuration File Format
///
/// ```toml
/// [gateway]
/// max_retries = 3
/// call_timeout_ms = 15000
/// transport = "stdio"
/// command = "node tool-servers/index.js"
///
/// [creation]
/// compensation_policy = "mark_partial"
///
/// [parse]
/// confidence_threshold = 0.70
///
/// [gates]
/// gate_timeout_s = 300
///
/// [discovery]
/// organization = "contoso"
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub creation: CreationConfig,
    pub parse: ParseConfig,
    pub gates: GatesConfig,
    pub discovery: DiscoveryConfig,
    pub security: SecurityConfig,
    /// Source attribution for each setting (for `config --show`).
    pub source_attribution: HashMap<String, ConfigSource>,
}

/// Tool gateway behavior: pacing, timeouts, retries and transport.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Transient-failure retries after the first attempt.
    pub max_retries: u32,
    pub call_timeout_ms: u64,
    /// Minimum delay before every remote call.
    pub min_wait_before_call_ms: u64,
    /// Jitter applied to the minimum delay, in percent.
    pub rate_jitter_pct: u8,
    pub retry_base_delay_ms: u64,
    pub retry_jitter_pct: u8,
    pub transport: TransportKind,
    /// Tool server command for the stdio transport, split on whitespace.
    pub command: Option<String>,
    pub ado_endpoint: Option<String>,
    pub jira_endpoint: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            call_timeout_ms: 15_000,
            min_wait_before_call_ms: 1_000,
            rate_jitter_pct: 10,
            retry_base_delay_ms: 500,
            retry_jitter_pct: 15,
            transport: TransportKind::Stdio,
            command: None,
            ado_endpoint: None,
            jira_endpoint: None,
        }
    }
}

/// Phase 9 creation, readiness polling, compensation and verification.
#[derive(Debug, Clone, PartialEq)]
pub struct CreationConfig {
    pub poll_initial_delay_ms: u64,
    pub max_poll_attempts: u32,
    /// Upper bound on the total time spent polling one entity.
    pub poll_bound_ms: u64,
    pub compensation_threshold_pct: u8,
    pub compensation_policy: CompensationPolicy,
    pub verify_not_found_attempts: u32,
    /// Above this many items, verification cross-checks with one search.
    pub verify_batch_threshold: usize,
}

impl Default for CreationConfig {
    fn default() -> Self {
        Self {
            poll_initial_delay_ms: 200,
            max_poll_attempts: 6,
            poll_bound_ms: 5_000,
            compensation_threshold_pct: 15,
            compensation_policy: CompensationPolicy::MarkPartial,
            verify_not_found_attempts: 3,
            verify_batch_threshold: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseConfig {
    pub confidence_threshold: f64,
    /// Scores at or above the floor but below the threshold get one re-parse.
    pub retry_floor: f64,
    /// Remote parser endpoint; the heuristic extractor is used when unset.
    pub endpoint: Option<String>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.70,
            retry_floor: 0.60,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatesConfig {
    pub gate_timeout_s: u64,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            gate_timeout_s: 300,
        }
    }
}

/// Organization and project preferences used by discovery and project setup.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    pub organization: Option<String>,
    pub project: Option<String>,
    pub project_type: String,
    pub region: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            organization: None,
            project: None,
            project_type: "Agile".to_string(),
            region: "Central US".to_string(),
        }
    }
}

/// Secret redaction tuning.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub extra_secret_patterns: Vec<String>,
    #[serde(default)]
    pub ignore_secret_patterns: Vec<String>,
}

impl Config {
    /// Built-in defaults with every key attributed to [`ConfigSource::Default`].
    #[must_use]
    pub fn defaults() -> Self {
        let source_attribution = super::ATTRIBUTED_KEYS
            .iter()
            .map(|k| ((*k).to_string(), ConfigSource::Default))
            .collect();
        Self {
            gateway: GatewayConfig::default(),
            creation: CreationConfig::default(),
            parse: ParseConfig::default(),
            gates: GatesConfig::default(),
            discovery: DiscoveryConfig::default(),
            security: SecurityConfig::default(),
            source_attribution,
        }
    }
}
