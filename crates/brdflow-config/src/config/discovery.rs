use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{CliArgs, CompensationPolicy, Config, ConfigSource, SecurityConfig, TransportKind};

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    gateway: Option<TomlGateway>,
    creation: Option<TomlCreation>,
    parse: Option<TomlParse>,
    gates: Option<TomlGates>,
    discovery: Option<TomlDiscovery>,
    security: Option<SecurityConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlGateway {
    max_retries: Option<u32>,
    call_timeout_ms: Option<u64>,
    min_wait_before_call_ms: Option<u64>,
    rate_jitter_pct: Option<u8>,
    retry_base_delay_ms: Option<u64>,
    retry_jitter_pct: Option<u8>,
    transport: Option<TransportKind>,
    command: Option<String>,
    ado_endpoint: Option<String>,
    jira_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlCreation {
    poll_initial_delay_ms: Option<u64>,
    max_poll_attempts: Option<u32>,
    poll_bound_ms: Option<u64>,
    compensation_threshold_pct: Option<u8>,
    compensation_policy: Option<CompensationPolicy>,
    verify_not_found_attempts: Option<u32>,
    verify_batch_threshold: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlParse {
    confidence_threshold: Option<f64>,
    retry_floor: Option<f64>,
    endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlGates {
    gate_timeout_s: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlDiscovery {
    organization: Option<String>,
    project: Option<String>,
    project_type: Option<String>,
    region: Option<String>,
}

/// Overwrite `slot` when `value` is present and attribute `key` to `source`.
fn apply<T>(
    slot: &mut T,
    value: Option<T>,
    key: &str,
    source: &ConfigSource,
    attribution: &mut HashMap<String, ConfigSource>,
) {
    if let Some(v) = value {
        *slot = v;
        attribution.insert(key.to_string(), source.clone());
    }
}

impl Config {
    /// Discover and load configuration with precedence: CLI > file > defaults
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory
    ///
    /// Path-driven variant used by tests to avoid process-global state.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self> {
        let mut config = Self::defaults();

        let config_path = match &cli_args.config_path {
            Some(explicit) => Some(explicit.clone()),
            None => Self::discover_config_file_from(start_dir),
        };

        if let Some(path) = &config_path {
            let file_config = Self::load_config_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;
            config.apply_file(file_config);
        }

        config.apply_cli(cli_args)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: TomlConfig) {
        let src = ConfigSource::Config;
        let attr = &mut self.source_attribution;

        if let Some(g) = file.gateway {
            let gw = &mut self.gateway;
            apply(&mut gw.max_retries, g.max_retries, "max_retries", &src, attr);
            apply(&mut gw.call_timeout_ms, g.call_timeout_ms, "call_timeout_ms", &src, attr);
            apply(
                &mut gw.min_wait_before_call_ms,
                g.min_wait_before_call_ms,
                "min_wait_before_call_ms",
                &src,
                attr,
            );
            apply(&mut gw.rate_jitter_pct, g.rate_jitter_pct, "rate_jitter_pct", &src, attr);
            apply(
                &mut gw.retry_base_delay_ms,
                g.retry_base_delay_ms,
                "retry_base_delay_ms",
                &src,
                attr,
            );
            apply(&mut gw.retry_jitter_pct, g.retry_jitter_pct, "retry_jitter_pct", &src, attr);
            apply(&mut gw.transport, g.transport, "transport", &src, attr);
            apply(&mut gw.command, g.command.map(Some), "command", &src, attr);
            apply(&mut gw.ado_endpoint, g.ado_endpoint.map(Some), "ado_endpoint", &src, attr);
            apply(&mut gw.jira_endpoint, g.jira_endpoint.map(Some), "jira_endpoint", &src, attr);
        }

        if let Some(c) = file.creation {
            let cr = &mut self.creation;
            apply(
                &mut cr.poll_initial_delay_ms,
                c.poll_initial_delay_ms,
                "poll_initial_delay_ms",
                &src,
                attr,
            );
            apply(&mut cr.max_poll_attempts, c.max_poll_attempts, "max_poll_attempts", &src, attr);
            apply(&mut cr.poll_bound_ms, c.poll_bound_ms, "poll_bound_ms", &src, attr);
            apply(
                &mut cr.compensation_threshold_pct,
                c.compensation_threshold_pct,
                "compensation_threshold_pct",
                &src,
                attr,
            );
            apply(
                &mut cr.compensation_policy,
                c.compensation_policy,
                "compensation_policy",
                &src,
                attr,
            );
            apply(
                &mut cr.verify_not_found_attempts,
                c.verify_not_found_attempts,
                "verify_not_found_attempts",
                &src,
                attr,
            );
            apply(
                &mut cr.verify_batch_threshold,
                c.verify_batch_threshold,
                "verify_batch_threshold",
                &src,
                attr,
            );
        }

        if let Some(p) = file.parse {
            apply(
                &mut self.parse.confidence_threshold,
                p.confidence_threshold,
                "confidence_threshold",
                &src,
                attr,
            );
            apply(&mut self.parse.retry_floor, p.retry_floor, "retry_floor", &src, attr);
            apply(&mut self.parse.endpoint, p.endpoint.map(Some), "parse_endpoint", &src, attr);
        }

        if let Some(g) = file.gates {
            apply(&mut self.gates.gate_timeout_s, g.gate_timeout_s, "gate_timeout_s", &src, attr);
        }

        if let Some(d) = file.discovery {
            let disc = &mut self.discovery;
            apply(&mut disc.organization, d.organization.map(Some), "organization", &src, attr);
            apply(&mut disc.project, d.project.map(Some), "project", &src, attr);
            apply(&mut disc.project_type, d.project_type, "project_type", &src, attr);
            apply(&mut disc.region, d.region, "region", &src, attr);
        }

        if let Some(security) = file.security {
            self.security = security;
        }
    }

    fn apply_cli(&mut self, cli: &CliArgs) -> Result<()> {
        let src = ConfigSource::Cli;
        let attr = &mut self.source_attribution;

        apply(&mut self.gateway.max_retries, cli.max_retries, "max_retries", &src, attr);
        apply(
            &mut self.gateway.call_timeout_ms,
            cli.call_timeout_ms,
            "call_timeout_ms",
            &src,
            attr,
        );
        apply(
            &mut self.gateway.min_wait_before_call_ms,
            cli.min_wait_before_call_ms,
            "min_wait_before_call_ms",
            &src,
            attr,
        );
        apply(&mut self.gates.gate_timeout_s, cli.gate_timeout_s, "gate_timeout_s", &src, attr);
        apply(
            &mut self.parse.confidence_threshold,
            cli.confidence_threshold,
            "confidence_threshold",
            &src,
            attr,
        );
        apply(&mut self.gateway.command, cli.tool_command.clone().map(Some), "command", &src, attr);
        apply(
            &mut self.discovery.organization,
            cli.organization.clone().map(Some),
            "organization",
            &src,
            attr,
        );
        apply(&mut self.discovery.project, cli.project.clone().map(Some), "project", &src, attr);

        if let Some(endpoint) = &cli.endpoint {
            apply(&mut self.gateway.ado_endpoint, Some(Some(endpoint.clone())), "ado_endpoint", &src, attr);
            apply(&mut self.gateway.jira_endpoint, Some(Some(endpoint.clone())), "jira_endpoint", &src, attr);
        }

        if let Some(policy) = &cli.compensation_policy {
            let parsed = policy.parse::<CompensationPolicy>().map_err(|value| {
                brdflow_utils::BrdflowError::Config(brdflow_utils::error::ConfigError::InvalidValue {
                    key: "compensation_policy".to_string(),
                    value,
                })
            })?;
            apply(&mut self.creation.compensation_policy, Some(parsed), "compensation_policy", &src, attr);
        }

        if let Some(transport) = &cli.transport {
            let parsed = transport.parse::<TransportKind>().map_err(|value| {
                brdflow_utils::BrdflowError::Config(brdflow_utils::error::ConfigError::InvalidValue {
                    key: "transport".to_string(),
                    value,
                })
            })?;
            apply(&mut self.gateway.transport, Some(parsed), "transport", &src, attr);
        }

        Ok(())
    }

    /// Search upward for `.brdflow/config.toml`, stopping at a repository root.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current = Some(start_dir);

        while let Some(dir) = current {
            let config_path = dir.join(".brdflow").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            if dir.join(".git").exists() || dir.join(".hg").exists() || dir.join(".svn").exists() {
                break;
            }

            current = dir.parent();
        }

        None
    }

    /// Load configuration from a TOML file; a missing file yields an empty config.
    fn load_config_file(path: &Path) -> Result<TomlConfig> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                anyhow::Error::new(brdflow_utils::BrdflowError::Config(
                    brdflow_utils::error::ConfigError::InvalidFile(e.to_string()),
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TomlConfig::default()),
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            )),
        }
    }
}
