use brdflow_utils::BrdflowError;
use brdflow_utils::error::ConfigError;

use super::{Config, TransportKind};

fn invalid(key: &str, value: &str) -> BrdflowError {
    BrdflowError::Config(ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), BrdflowError> {
        let gw = &self.gateway;
        if gw.max_retries > 10 {
            return Err(invalid("max_retries", "exceeds maximum limit of 10"));
        }
        if gw.call_timeout_ms == 0 {
            return Err(invalid("call_timeout_ms", "must be greater than 0"));
        }
        if gw.call_timeout_ms > 600_000 {
            return Err(invalid("call_timeout_ms", "exceeds maximum limit of 600000 (10 minutes)"));
        }
        if gw.min_wait_before_call_ms > 60_000 {
            return Err(invalid("min_wait_before_call_ms", "exceeds maximum limit of 60000"));
        }
        for (key, pct) in [
            ("rate_jitter_pct", gw.rate_jitter_pct),
            ("retry_jitter_pct", gw.retry_jitter_pct),
            ("compensation_threshold_pct", self.creation.compensation_threshold_pct),
        ] {
            if pct > 100 {
                return Err(invalid(key, "must be a percentage between 0 and 100"));
            }
        }
        if gw.transport == TransportKind::Http
            && gw.ado_endpoint.is_none()
            && gw.jira_endpoint.is_none()
        {
            return Err(BrdflowError::Config(ConfigError::MissingRequired(
                "gateway.ado_endpoint or gateway.jira_endpoint".to_string(),
            )));
        }

        let cr = &self.creation;
        if cr.max_poll_attempts == 0 {
            return Err(invalid("max_poll_attempts", "must be greater than 0"));
        }
        if cr.poll_bound_ms == 0 {
            return Err(invalid("poll_bound_ms", "must be greater than 0"));
        }
        if cr.compensation_threshold_pct == 0 {
            return Err(invalid("compensation_threshold_pct", "must be greater than 0"));
        }
        if cr.verify_not_found_attempts == 0 {
            return Err(invalid("verify_not_found_attempts", "must be greater than 0"));
        }

        let parse = &self.parse;
        if !(parse.confidence_threshold > 0.0 && parse.confidence_threshold <= 1.0) {
            return Err(invalid("confidence_threshold", "must be within (0, 1]"));
        }
        if !(parse.retry_floor > 0.0 && parse.retry_floor <= 1.0) {
            return Err(invalid("retry_floor", "must be within (0, 1]"));
        }
        if parse.retry_floor > parse.confidence_threshold {
            return Err(invalid("retry_floor", "must not exceed confidence_threshold"));
        }

        if self.gates.gate_timeout_s == 0 {
            return Err(invalid("gate_timeout_s", "must be greater than 0"));
        }

        if self.discovery.project_type.trim().is_empty() {
            return Err(invalid("project_type", "must not be empty"));
        }

        Ok(())
    }
}
