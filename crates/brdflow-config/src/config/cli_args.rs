use std::path::PathBuf;

/// CLI overrides layered on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub max_retries: Option<u32>,
    pub call_timeout_ms: Option<u64>,
    pub min_wait_before_call_ms: Option<u64>,
    pub gate_timeout_s: Option<u64>,
    pub compensation_policy: Option<String>,
    pub confidence_threshold: Option<f64>,
    pub transport: Option<String>,
    pub tool_command: Option<String>,
    pub endpoint: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
}
