use brdflow_utils::BrdflowError;

use super::{CompensationPolicy, Config, ConfigSource, TransportKind};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// ```rust
    /// use brdflow_config::{CompensationPolicy, Config};
    ///
    /// let config = Config::builder()
    ///     .max_retries(2)
    ///     .min_wait_before_call_ms(0)
    ///     .compensation_policy(CompensationPolicy::Delete)
    ///     .build()
    ///     .expect("valid config");
    /// assert_eq!(config.gateway.max_retries, 2);
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for programmatic configuration of brdflow.
///
/// Values set via the builder are attributed to [`ConfigSource::Programmatic`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config::defaults(),
        }
    }

    fn mark(&mut self, key: &str) {
        self.config
            .source_attribution
            .insert(key.to_string(), ConfigSource::Programmatic);
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.gateway.max_retries = retries;
        self.mark("max_retries");
        self
    }

    #[must_use]
    pub fn call_timeout_ms(mut self, ms: u64) -> Self {
        self.config.gateway.call_timeout_ms = ms;
        self.mark("call_timeout_ms");
        self
    }

    #[must_use]
    pub fn min_wait_before_call_ms(mut self, ms: u64) -> Self {
        self.config.gateway.min_wait_before_call_ms = ms;
        self.mark("min_wait_before_call_ms");
        self
    }

    #[must_use]
    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.gateway.retry_base_delay_ms = ms;
        self.mark("retry_base_delay_ms");
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.config.gateway.transport = transport;
        self.mark("transport");
        self
    }

    #[must_use]
    pub fn tool_command(mut self, command: impl Into<String>) -> Self {
        self.config.gateway.command = Some(command.into());
        self.mark("command");
        self
    }

    /// Polling delays for readiness checks and verification retries.
    #[must_use]
    pub fn poll(mut self, initial_delay_ms: u64, max_attempts: u32, bound_ms: u64) -> Self {
        self.config.creation.poll_initial_delay_ms = initial_delay_ms;
        self.config.creation.max_poll_attempts = max_attempts;
        self.config.creation.poll_bound_ms = bound_ms;
        self.mark("poll_initial_delay_ms");
        self.mark("max_poll_attempts");
        self.mark("poll_bound_ms");
        self
    }

    #[must_use]
    pub fn compensation_threshold_pct(mut self, pct: u8) -> Self {
        self.config.creation.compensation_threshold_pct = pct;
        self.mark("compensation_threshold_pct");
        self
    }

    #[must_use]
    pub fn compensation_policy(mut self, policy: CompensationPolicy) -> Self {
        self.config.creation.compensation_policy = policy;
        self.mark("compensation_policy");
        self
    }

    #[must_use]
    pub fn verify_batch_threshold(mut self, threshold: usize) -> Self {
        self.config.creation.verify_batch_threshold = threshold;
        self.mark("verify_batch_threshold");
        self
    }

    #[must_use]
    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        self.config.parse.confidence_threshold = threshold;
        self.mark("confidence_threshold");
        self
    }

    #[must_use]
    pub fn gate_timeout_s(mut self, secs: u64) -> Self {
        self.config.gates.gate_timeout_s = secs;
        self.mark("gate_timeout_s");
        self
    }

    #[must_use]
    pub fn organization(mut self, org: impl Into<String>) -> Self {
        self.config.discovery.organization = Some(org.into());
        self.mark("organization");
        self
    }

    #[must_use]
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.config.discovery.project = Some(project.into());
        self.mark("project");
        self
    }

    #[must_use]
    pub fn extra_secret_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.security.extra_secret_patterns.push(pattern.into());
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<Config, BrdflowError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_attributes_programmatic() {
        let config = Config::builder()
            .gate_timeout_s(5)
            .organization("contoso")
            .build()
            .unwrap();
        assert_eq!(config.gates.gate_timeout_s, 5);
        assert_eq!(config.discovery.organization.as_deref(), Some("contoso"));
        assert_eq!(
            config.source_attribution.get("gate_timeout_s"),
            Some(&ConfigSource::Programmatic)
        );
        assert_eq!(
            config.source_attribution.get("max_retries"),
            Some(&ConfigSource::Default)
        );
    }

    #[test]
    fn test_builder_validates() {
        assert!(Config::builder().confidence_threshold(0.0).build().is_err());
    }
}
