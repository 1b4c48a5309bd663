//! Credential redaction for tool-call traces, logs and user-facing errors
//!
//! Tracker tool servers are OAuth-backed, so payloads and error texts can carry
//! bearer tokens, refresh tokens, client secrets and personal access tokens.
//! Everything that leaves the process (trace artifacts, log lines, error
//! reports) goes through a [`SecretRedactor`] first.

use anyhow::{Context, Result};
use regex::{Regex, RegexSet};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Definition of a secret pattern for documentation and runtime use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretPatternDef {
    /// Unique identifier for the pattern (e.g., "bearer_token")
    pub id: &'static str,
    /// Category for grouping (e.g., "OAuth")
    pub category: &'static str,
    /// The regex pattern string
    pub regex: &'static str,
    /// Human-readable description
    pub description: &'static str,
}

/// Configuration provider for secret redaction settings.
///
/// Keeps `SecretRedactor` decoupled from the concrete config type while allowing
/// `Config` to opt in via an impl in the config crate.
pub trait SecretConfigProvider {
    fn extra_secret_patterns(&self) -> &[String];
    fn ignore_secret_patterns(&self) -> &[String];
}

/// Built-in patterns, one entry per credential shape seen in tracker traffic.
pub static DEFAULT_SECRET_PATTERNS: &[SecretPatternDef] = &[
    // OAuth
    SecretPatternDef {
        id: "bearer_token",
        category: "OAuth",
        regex: r"Bearer [A-Za-z0-9._~+/=-]{20,}",
        description: "Authorization bearer tokens",
    },
    SecretPatternDef {
        id: "oauth_token_assignment",
        category: "OAuth",
        regex: r#"(?i)"?(?:access_token|refresh_token|id_token)"?\s*[=:]\s*"?[A-Za-z0-9._~+/-]{16,}"#,
        description: "Access or refresh token assignments in query strings and JSON",
    },
    SecretPatternDef {
        id: "oauth_client_secret",
        category: "OAuth",
        regex: r#"(?i)"?client_secret"?\s*[=:]\s*"?[A-Za-z0-9._~+/-]{16,}"#,
        description: "OAuth client secrets",
    },
    SecretPatternDef {
        id: "jwt_token",
        category: "OAuth",
        regex: r"eyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}",
        description: "JSON Web Tokens",
    },
    SecretPatternDef {
        id: "authorization_basic",
        category: "HTTP",
        regex: r"Basic [A-Za-z0-9+/]{16,}={0,2}",
        description: "HTTP basic authorization headers",
    },
    // Azure DevOps
    SecretPatternDef {
        id: "ado_personal_access_token",
        category: "Azure DevOps",
        regex: r#"(?i)(?:pat|personal_access_token|azure_devops_pat)"?\s*[=:]\s*"?[A-Za-z0-9]{52,84}"#,
        description: "Azure DevOps personal access token assignments",
    },
    SecretPatternDef {
        id: "azure_client_secret",
        category: "Azure DevOps",
        regex: r"[A-Za-z0-9_~.-]{3}8Q~[A-Za-z0-9_~.-]{31,34}",
        description: "Entra ID application client secrets",
    },
    // Atlassian
    SecretPatternDef {
        id: "atlassian_api_token",
        category: "Atlassian",
        regex: r"ATATT3[A-Za-z0-9_=-]{20,}",
        description: "Atlassian API tokens",
    },
    // Generic
    SecretPatternDef {
        id: "github_pat",
        category: "Generic",
        regex: r"ghp_[A-Za-z0-9]{36}",
        description: "GitHub personal access tokens",
    },
    SecretPatternDef {
        id: "private_key_block",
        category: "Generic",
        regex: r"-----BEGIN (?:RSA |EC |OPENSSH )?PRIVATE KEY-----",
        description: "PEM private key markers",
    },
];

/// JSON object keys whose values are always masked regardless of shape.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "token",
    "secret",
    "password",
    "authorization",
    "api_key",
    "apikey",
    "cookie",
];

const MASK: &str = "***";

/// Secret redactor with configurable patterns
#[derive(Debug, Clone)]
pub struct SecretRedactor {
    default_patterns: HashMap<String, Regex>,
    extra_patterns: HashMap<String, Regex>,
    ignored_patterns: Vec<String>,
    // RegexSet pre-filters; patterns_linear shares its indices.
    regex_set: RegexSet,
    patterns_linear: Vec<(String, Regex)>,
}

/// Information about a detected secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMatch {
    /// Pattern ID that matched
    pub pattern_id: String,
    /// Where the content came from (file path, "<trace>", "<log>")
    pub location: String,
    /// Line number (1-based)
    pub line_number: usize,
    /// Context around the match (never includes the secret)
    pub context: String,
}

/// Result of redaction operation
#[derive(Debug, Clone)]
pub struct RedactionResult {
    pub content: String,
    pub matches: Vec<SecretMatch>,
    pub has_secrets: bool,
}

impl SecretRedactor {
    /// Create a redactor with the built-in patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile.
    pub fn new() -> Result<Self> {
        let mut default_patterns = HashMap::new();
        for def in DEFAULT_SECRET_PATTERNS {
            let regex = Regex::new(def.regex)
                .with_context(|| format!("Failed to compile {} regex: {}", def.id, def.regex))?;
            default_patterns.insert(def.id.to_string(), regex);
        }

        let mut redactor = Self {
            default_patterns,
            extra_patterns: HashMap::new(),
            ignored_patterns: Vec::new(),
            regex_set: RegexSet::empty(),
            patterns_linear: Vec::new(),
        };
        redactor.rebuild_regex_set()?;
        Ok(redactor)
    }

    fn rebuild_regex_set(&mut self) -> Result<()> {
        let mut all: Vec<(&String, &Regex)> = self
            .default_patterns
            .iter()
            .chain(self.extra_patterns.iter())
            .collect();
        all.sort_by(|(a, _), (b, _)| a.cmp(b));

        let linear: Vec<(String, Regex)> = all
            .into_iter()
            .filter(|(id, _)| !self.is_pattern_ignored(id))
            .map(|(id, regex)| (id.clone(), regex.clone()))
            .collect();

        self.regex_set = RegexSet::new(linear.iter().map(|(_, r)| r.as_str()))
            .context("Failed to compile RegexSet for secret redaction")?;
        self.patterns_linear = linear;
        Ok(())
    }

    /// Build a redactor from the `[security]` section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any extra pattern fails to compile.
    pub fn from_config<T: SecretConfigProvider>(config: &T) -> Result<Self> {
        let mut redactor = Self::new()?;
        redactor
            .ignored_patterns
            .extend(config.ignore_secret_patterns().iter().cloned());

        for (idx, pattern) in config.extra_secret_patterns().iter().enumerate() {
            let regex = Regex::new(pattern)
                .with_context(|| format!("Failed to compile extra pattern {idx}: {pattern}"))?;
            redactor
                .extra_patterns
                .insert(format!("extra_pattern_{idx}"), regex);
        }

        redactor.rebuild_regex_set()?;
        Ok(redactor)
    }

    /// Replace every detected secret with `***`.
    #[must_use]
    pub fn redact_string(&self, text: &str) -> String {
        let matches = self.regex_set.matches(text);
        if !matches.matched_any() {
            return text.to_string();
        }

        let mut redacted = text.to_string();
        for index in matches.iter() {
            if let Some((_, regex)) = self.patterns_linear.get(index) {
                redacted = regex.replace_all(&redacted, MASK).into_owned();
            }
        }
        redacted
    }

    /// Redact a JSON document: sensitive keys are masked outright and every
    /// string value is passed through [`redact_string`](Self::redact_string).
    #[must_use]
    pub fn redact_json(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact_string(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_json(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let masked = if is_sensitive_key(k) && !v.is_null() {
                            Value::String(MASK.to_string())
                        } else {
                            self.redact_json(v)
                        };
                        (k.clone(), masked)
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Scan content for secrets and return matches without redacting
    #[must_use]
    pub fn scan_for_secrets(&self, content: &str, location: &str) -> Vec<SecretMatch> {
        let set_matches = self.regex_set.matches(content);
        if !set_matches.matched_any() {
            return Vec::new();
        }

        let mut results = Vec::new();
        for index in set_matches.iter() {
            let Some((pattern_id, regex)) = self.patterns_linear.get(index) else {
                continue;
            };
            for (line_idx, line) in content.lines().enumerate() {
                for m in regex.find_iter(line) {
                    results.push(SecretMatch {
                        pattern_id: pattern_id.clone(),
                        location: location.to_string(),
                        line_number: line_idx + 1,
                        context: safe_context(line, m.start(), m.end()),
                    });
                }
            }
        }
        results
    }

    /// Replace secrets with `[REDACTED:<pattern_id>]` markers
    #[must_use]
    pub fn redact_content(&self, content: &str, location: &str) -> RedactionResult {
        let matches = self.scan_for_secrets(content, location);
        if matches.is_empty() {
            return RedactionResult {
                content: content.to_string(),
                matches,
                has_secrets: false,
            };
        }

        let mut redacted = content.to_string();
        for (pattern_id, regex) in &self.patterns_linear {
            if matches.iter().any(|m| &m.pattern_id == pattern_id) {
                redacted = regex
                    .replace_all(&redacted, format!("[REDACTED:{pattern_id}]").as_str())
                    .into_owned();
            }
        }

        RedactionResult {
            content: redacted,
            matches,
            has_secrets: true,
        }
    }

    #[must_use]
    pub fn has_secrets(&self, content: &str) -> bool {
        self.regex_set.is_match(content)
    }

    fn is_pattern_ignored(&self, pattern_id: &str) -> bool {
        self.ignored_patterns.iter().any(|p| p == pattern_id)
    }
}

impl Default for SecretRedactor {
    fn default() -> Self {
        Self::new().expect("built-in secret patterns compile")
    }
}

static DEFAULT_REDACTOR: LazyLock<SecretRedactor> = LazyLock::new(SecretRedactor::default);

/// Process-global redactor with the built-in patterns.
#[must_use]
pub fn default_redactor() -> &'static SecretRedactor {
    &DEFAULT_REDACTOR
}

/// Redact a user-facing string with the default redactor.
///
/// ```
/// use brdflow_redaction::redact_user_string;
///
/// let msg = format!("refresh failed for Bearer {}", "a".repeat(40));
/// assert!(!redact_user_string(&msg).contains(&"a".repeat(40)));
/// ```
#[must_use]
pub fn redact_user_string(text: &str) -> String {
    default_redactor().redact_string(text)
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|f| lower.contains(f))
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn safe_context(line: &str, start: usize, end: usize) -> String {
    let before = floor_char_boundary(line, start.saturating_sub(10));
    let after = ceil_char_boundary(line, (end + 10).min(line.len()));
    format!("{}[REDACTED]{}", &line[before..start], &line[end..after])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    struct TestConfig {
        extra: Vec<String>,
        ignore: Vec<String>,
    }

    impl SecretConfigProvider for TestConfig {
        fn extra_secret_patterns(&self) -> &[String] {
            &self.extra
        }
        fn ignore_secret_patterns(&self) -> &[String] {
            &self.ignore
        }
    }

    #[test]
    fn test_all_default_patterns_compile() {
        let redactor = SecretRedactor::new().unwrap();
        assert_eq!(redactor.patterns_linear.len(), DEFAULT_SECRET_PATTERNS.len());
    }

    #[test]
    fn test_bearer_token_redacted() {
        let redactor = SecretRedactor::new().unwrap();
        let token = "x".repeat(32);
        let out = redactor.redact_string(&format!("Authorization: Bearer {token}"));
        assert!(!out.contains(&token));
        assert!(out.contains("***"));
    }

    #[test]
    fn test_refresh_token_in_json_text() {
        let redactor = SecretRedactor::new().unwrap();
        let text = r#"{"refresh_token": "abcdefghijklmnopqrstuvwxyz012345"}"#;
        assert!(redactor.has_secrets(text));
        assert!(!redactor.redact_string(text).contains("abcdefghijklmnop"));
    }

    #[test]
    fn test_atlassian_token_marker() {
        let redactor = SecretRedactor::new().unwrap();
        let token = format!("ATATT3{}", "xY9".repeat(10));
        let result = redactor.redact_content(&format!("token {token} rejected"), "<trace>");
        assert!(result.has_secrets);
        assert!(result.content.contains("[REDACTED:atlassian_api_token]"));
        assert_eq!(result.matches[0].line_number, 1);
    }

    #[test]
    fn test_redact_json_masks_sensitive_keys_and_values() {
        let redactor = SecretRedactor::new().unwrap();
        let payload = json!({
            "title": "Login with SSO",
            "client_secret": "short",
            "headers": { "Authorization": "anything" },
            "notes": ["call with Bearer abcdefghijklmnopqrstuvwxyz"],
            "count": 3
        });

        let redacted = redactor.redact_json(&payload);
        assert_eq!(redacted["title"], "Login with SSO");
        assert_eq!(redacted["client_secret"], "***");
        assert_eq!(redacted["headers"]["Authorization"], "***");
        assert_eq!(redacted["count"], 3);
        assert!(!redacted["notes"][0].as_str().unwrap().contains("abcdefghij"));
    }

    #[test]
    fn test_from_config_extra_and_ignore() {
        let config = TestConfig {
            extra: vec!["CORP_[A-Z0-9]{12}".to_string()],
            ignore: vec!["github_pat".to_string()],
        };
        let redactor = SecretRedactor::from_config(&config).unwrap();

        assert!(redactor.has_secrets("key CORP_ABCDEF123456"));
        let gh = format!("ghp_{}", "a".repeat(36));
        assert!(!redactor.has_secrets(&gh));
    }

    #[test]
    fn test_from_config_rejects_invalid_regex() {
        let config = TestConfig {
            extra: vec!["([unclosed".to_string()],
            ignore: vec![],
        };
        assert!(SecretRedactor::from_config(&config).is_err());
    }

    #[test]
    fn test_safe_context_respects_char_boundaries() {
        let line = "ééééééé Bearer abcdefghijklmnopqrstuvwxyz ééééé";
        let redactor = SecretRedactor::new().unwrap();
        let matches = redactor.scan_for_secrets(line, "<log>");
        assert_eq!(matches.len(), 1);
        assert!(matches[0].context.contains("[REDACTED]"));
    }

    proptest! {
        #[test]
        fn prop_plain_words_pass_through(text in "[a-z ]{0,64}") {
            let redactor = default_redactor();
            prop_assert_eq!(redactor.redact_string(&text), text);
        }
    }
}
