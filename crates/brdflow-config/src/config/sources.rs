use std::collections::HashMap;

use brdflow_utils::types::ConfigSource;

use super::Config;

fn stable_source_label(source: &ConfigSource) -> &'static str {
    match source {
        ConfigSource::Cli => "cli",
        ConfigSource::Config => "config",
        ConfigSource::Programmatic => "programmatic",
        ConfigSource::Default => "default",
    }
}

fn source_label(source: Option<&ConfigSource>) -> String {
    stable_source_label(source.unwrap_or(&ConfigSource::Default)).to_string()
}

impl Config {
    /// Effective configuration as `key -> (value, source)`.
    #[must_use]
    pub fn effective_config(&self) -> HashMap<String, (String, String)> {
        let mut config = HashMap::new();

        let mut add = |key: &str, value: Option<String>| {
            if let Some(val) = value {
                let source = source_label(self.source_attribution.get(key));
                config.insert(key.to_string(), (val, source));
            }
        };

        let gw = &self.gateway;
        add("max_retries", Some(gw.max_retries.to_string()));
        add("call_timeout_ms", Some(gw.call_timeout_ms.to_string()));
        add("min_wait_before_call_ms", Some(gw.min_wait_before_call_ms.to_string()));
        add("rate_jitter_pct", Some(gw.rate_jitter_pct.to_string()));
        add("retry_base_delay_ms", Some(gw.retry_base_delay_ms.to_string()));
        add("retry_jitter_pct", Some(gw.retry_jitter_pct.to_string()));
        add("transport", Some(gw.transport.to_string()));
        add("command", gw.command.clone());
        add("ado_endpoint", gw.ado_endpoint.clone());
        add("jira_endpoint", gw.jira_endpoint.clone());

        let cr = &self.creation;
        add("poll_initial_delay_ms", Some(cr.poll_initial_delay_ms.to_string()));
        add("max_poll_attempts", Some(cr.max_poll_attempts.to_string()));
        add("poll_bound_ms", Some(cr.poll_bound_ms.to_string()));
        add("compensation_threshold_pct", Some(cr.compensation_threshold_pct.to_string()));
        add("compensation_policy", Some(cr.compensation_policy.to_string()));
        add("verify_not_found_attempts", Some(cr.verify_not_found_attempts.to_string()));
        add("verify_batch_threshold", Some(cr.verify_batch_threshold.to_string()));

        add("confidence_threshold", Some(format!("{:.2}", self.parse.confidence_threshold)));
        add("retry_floor", Some(format!("{:.2}", self.parse.retry_floor)));
        add("parse_endpoint", self.parse.endpoint.clone());
        add("gate_timeout_s", Some(self.gates.gate_timeout_s.to_string()));

        add("organization", self.discovery.organization.clone());
        add("project", self.discovery.project.clone());
        add("project_type", Some(self.discovery.project_type.clone()));
        add("region", Some(self.discovery.region.clone()));

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_config_labels_sources() {
        let config = Config::builder().max_retries(1).build().unwrap();
        let effective = config.effective_config();
        assert_eq!(
            effective.get("max_retries"),
            Some(&("1".to_string(), "programmatic".to_string()))
        );
        assert_eq!(
            effective.get("confidence_threshold"),
            Some(&("0.70".to_string(), "default".to_string()))
        );
        assert!(!effective.contains_key("organization"));
    }
}
