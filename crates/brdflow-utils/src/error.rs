use std::fmt;
use std::io;
use thiserror::Error;

pub use brdflow_lock::LockError;

use crate::types::{ErrorClass, GateKind, PhaseId};

/// Library-level error type with rich context and user-friendly reporting.
///
/// `BrdflowError` is the primary error type returned by brdflow library
/// operations. It carries enough detail for programmatic handling, renders
/// user-facing messages with context and suggestions, and maps onto CLI exit
/// codes.
///
/// # Error Categories
///
/// | Variant | Description |
/// |---------|-------------|
/// | `Config` | Configuration file or CLI argument errors |
/// | `Gateway` | Tool server calls that failed after the retry policy |
/// | `Parse` | BRD could not be turned into requirements |
/// | `Structure` | Hierarchy stayed invalid after one regroup |
/// | `Ledger` | Idempotency ledger conflict (logic error) |
/// | `Checkpoint` | Checkpoint store read/write failures |
/// | `Phase` | State machine violations, escalations, cancellation |
/// | `Gate` | Gate replies that cannot be applied, gate timeouts |
/// | `Lock` | Another process drives the same run |
///
/// # Exit Code Mapping
///
/// | Exit Code | Error Type |
/// |-----------|------------|
/// | 2 | Configuration errors, invalid transitions |
/// | 5 | Structural failure |
/// | 9 | Lock held |
/// | 10 | Gate timeout |
/// | 11 | Cancelled |
/// | 12 | Escalation |
/// | 70 | Gateway failure |
/// | 1 | Other errors |
///
/// Library code returns `BrdflowError` and does NOT call `std::process::exit()`.
#[derive(Error, Debug)]
pub enum BrdflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tool gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Structure error: {0}")]
    Structure(#[from] StructureError),

    #[error("Idempotency ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),

    #[error("Gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Run lock error: {0}")]
    Lock(#[from] LockError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Canonicalization failed for {context}: {reason}")]
    CanonicalizationFailed { context: String, reason: String },

    #[error("Artifact write failed at {path}: {reason}")]
    ArtifactWriteFailed { path: String, reason: String },
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Authentication,
    Gateway,
    Parsing,
    Structure,
    Creation,
    Verification,
    Gate,
    Checkpoint,
    Concurrency,
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Authentication => write!(f, "Authentication"),
            Self::Gateway => write!(f, "Tool Gateway"),
            Self::Parsing => write!(f, "Parsing"),
            Self::Structure => write!(f, "Structure"),
            Self::Creation => write!(f, "Creation"),
            Self::Verification => write!(f, "Verification"),
            Self::Gate => write!(f, "Gate"),
            Self::Checkpoint => write!(f, "Checkpoint"),
            Self::Concurrency => write!(f, "Concurrency"),
            Self::Validation => write!(f, "Validation"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => {
                format!("Configuration file has invalid format: {reason}")
            }
            Self::MissingRequired(key) => format!("Required configuration '{key}' is missing"),
            Self::InvalidValue { key, value } => {
                format!("Configuration '{key}' has invalid value: {value}")
            }
            Self::NotFound { path } => format!("Configuration file not found: {path}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::InvalidFile(_) => Some(
                "Configuration files are TOML with [gateway], [creation], [parse], [gates], [discovery] and [security] sections."
                    .to_string(),
            ),
            Self::MissingRequired(_) => {
                Some("The tool server transport needs a command or endpoint to reach the tracker.".to_string())
            }
            Self::InvalidValue { key, .. } => {
                Some(format!("The '{key}' option has range requirements."))
            }
            Self::NotFound { .. } => Some(
                "brdflow searches for .brdflow/config.toml from the current directory upward."
                    .to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec![
                "Check the TOML syntax".to_string(),
                "Run 'brdflow config --show' to see the effective configuration".to_string(),
            ],
            Self::MissingRequired(key) => vec![
                format!("Set '{key}' in .brdflow/config.toml"),
                "Use the matching CLI flag for a one-off run".to_string(),
            ],
            Self::InvalidValue { key, .. } => match key.as_str() {
                "confidence_threshold" | "retry_floor" => vec![
                    "Use a value in (0, 1], e.g. 0.70".to_string(),
                    "Keep retry_floor at or below confidence_threshold".to_string(),
                ],
                "compensation_policy" => {
                    vec!["Use 'delete' or 'mark_partial'".to_string()]
                }
                "transport" => vec!["Use 'stdio' or 'http'".to_string()],
                _ => vec![
                    "Remove the option to use the default value".to_string(),
                    "Check the documented range for this option".to_string(),
                ],
            },
            Self::NotFound { .. } => vec![
                "Create .brdflow/config.toml in your project root".to_string(),
                "Pass --config <path> explicitly".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Failures surfaced by the tool gateway after the retry policy ran its course.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("{operation} failed with transient error {code} after {attempts} attempt(s): {message}")]
    Transient {
        operation: String,
        code: i32,
        message: String,
        attempts: u32,
    },

    #[error("{operation} failed with permanent error {code}: {message}")]
    Permanent {
        operation: String,
        code: i32,
        message: String,
    },

    #[error("{operation} was rejected ({code}): {message}")]
    Client {
        operation: String,
        code: i32,
        message: String,
    },

    #[error("Tool server transport failure: {0}")]
    Transport(String),

    #[error("Tool server returned a malformed response: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Build the error matching a failed result code.
    #[must_use]
    pub fn from_code(operation: &str, code: i32, message: String, attempts: u32) -> Self {
        match ErrorClass::from_code(code) {
            Some(ErrorClass::Transient) => Self::Transient {
                operation: operation.to_string(),
                code,
                message,
                attempts,
            },
            Some(ErrorClass::Client) => Self::Client {
                operation: operation.to_string(),
                code,
                message,
            },
            _ => Self::Permanent {
                operation: operation.to_string(),
                code,
                message,
            },
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient { .. } | Self::Transport(_) => ErrorClass::Transient,
            Self::Permanent { .. } | Self::Protocol(_) => ErrorClass::Permanent,
            Self::Client { .. } => ErrorClass::Client,
        }
    }

    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Transient { code, .. }
            | Self::Permanent { code, .. }
            | Self::Client { code, .. } => *code,
            Self::Transport(_) => 101,
            Self::Protocol(_) => 202,
        }
    }

    /// Not-found is a client error the verifier and pollers treat as "not yet".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Client { code: 404, .. })
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Client { code: 401 | 403, .. })
    }
}

impl UserFriendlyError for GatewayError {
    fn user_message(&self) -> String {
        match self {
            Self::Transient {
                operation,
                attempts,
                ..
            } => format!("The tracker kept failing on '{operation}' after {attempts} attempt(s)"),
            Self::Permanent {
                operation, message, ..
            } => format!("The tracker refused '{operation}': {message}"),
            Self::Client {
                operation, message, ..
            } => format!("'{operation}' could not be completed: {message}"),
            Self::Transport(reason) => format!("Could not reach the tool server: {reason}"),
            Self::Protocol(reason) => format!("The tool server answered unexpectedly: {reason}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Transient { .. } | Self::Transport(_) => Some(
                "Transient failures are retried up to max_retries times with exponential backoff."
                    .to_string(),
            ),
            Self::Client { code: 401 | 403, .. } => {
                Some("The tool server's OAuth session is missing or expired.".to_string())
            }
            Self::Client { code: 404, .. } => Some(
                "Newly created projects and work items can take a moment to become visible."
                    .to_string(),
            ),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Transient { .. } | Self::Transport(_) => vec![
                "Resume the run later with 'brdflow resume <run_id>'".to_string(),
                "Check tool server connectivity and rate limits".to_string(),
            ],
            Self::Client { code: 401 | 403, .. } => vec![
                "Re-authenticate the tool server and resume the run".to_string(),
            ],
            Self::Client { .. } => vec![
                "Check the organization and project names for typos".to_string(),
                "Resume the run once the input is corrected".to_string(),
            ],
            Self::Permanent { .. } | Self::Protocol(_) => vec![
                "Inspect trace.json in the run's artifacts directory".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        if self.is_unauthorized() {
            ErrorCategory::Authentication
        } else {
            ErrorCategory::Gateway
        }
    }
}

/// Errors from the parse capability
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("BRD document is empty")]
    EmptyDocument,

    #[error("Parser backend failed: {0}")]
    Backend(String),

    #[error("Parser returned malformed output: {0}")]
    Malformed(String),
}

impl UserFriendlyError for ParseError {
    fn user_message(&self) -> String {
        match self {
            Self::EmptyDocument => "The BRD contains no text to parse".to_string(),
            Self::Backend(reason) => format!("The requirement parser failed: {reason}"),
            Self::Malformed(reason) => format!("The requirement parser returned bad data: {reason}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::EmptyDocument => None,
            _ => Some(
                "Low-confidence parses fall back to the heuristic extractor; backend failures do too when no output is usable."
                    .to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::EmptyDocument => vec!["Pass a BRD file with --brd <path>".to_string()],
            _ => vec!["Unset [parse] endpoint to use the heuristic extractor only".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Parsing
    }
}

/// Hierarchy structuring errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("Hierarchy still invalid after regrouping: {}", violations.join("; "))]
    Invalid { violations: Vec<String> },

    #[error("No requirements to structure")]
    Empty,

    #[error("No node with trace id '{trace_id}'")]
    UnknownNode { trace_id: String },

    #[error("Invalid edit: {reason}")]
    InvalidEdit { reason: String },

    #[error("Hierarchy is frozen once creation has started")]
    Frozen,
}

impl UserFriendlyError for StructureError {
    fn user_message(&self) -> String {
        match self {
            Self::Invalid { violations } => format!(
                "The work-item hierarchy is invalid ({} violation(s))",
                violations.len()
            ),
            Self::Empty => "No requirements were found to build a hierarchy from".to_string(),
            Self::UnknownNode { trace_id } => format!("No work item has trace id '{trace_id}'"),
            Self::InvalidEdit { reason } => format!("The edit could not be applied: {reason}"),
            Self::Frozen => "The hierarchy can no longer be edited".to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Invalid { violations } => Some(violations.join("\n")),
            Self::Frozen => Some("Creation (phase 9) has already started.".to_string()),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::UnknownNode { .. } | Self::InvalidEdit { .. } => vec![
                "Use 'brdflow status <run_id>' to list trace ids".to_string(),
                "Edit syntax: edit <trace_id>.<title|description|parent>:<value>".to_string(),
            ],
            Self::Invalid { .. } => vec![
                "Reject the hierarchy at review to re-parse the BRD".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Structure
    }
}

/// Idempotency ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger key {key} already maps to {existing}, refusing to record {attempted}")]
    Conflict {
        key: String,
        existing: String,
        attempted: String,
    },
}

impl UserFriendlyError for LedgerError {
    fn user_message(&self) -> String {
        match self {
            Self::Conflict { existing, attempted, .. } => format!(
                "Two different work items ({existing} and {attempted}) were created for the same requirement"
            ),
        }
    }

    fn context(&self) -> Option<String> {
        Some("Every creation is recorded once; a conflicting record indicates a duplicate remote item.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        vec!["Inspect the tracker for the duplicate and remove it before resuming".to_string()]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Creation
    }
}

/// Checkpoint store errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("No checkpoint found for run '{run_id}'")]
    NotFound { run_id: String },

    #[error("Run '{run_id}' already exists")]
    AlreadyExists { run_id: String },

    #[error("Failed to write checkpoint at {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Checkpoint at {path} is unreadable: {reason}")]
    Corrupt { path: String, reason: String },
}

impl UserFriendlyError for CheckpointError {
    fn user_message(&self) -> String {
        match self {
            Self::NotFound { run_id } => format!("Run '{run_id}' has no saved state"),
            Self::AlreadyExists { run_id } => format!("Run '{run_id}' has already been started"),
            Self::WriteFailed { path, reason } => {
                format!("Could not save run state to {path}: {reason}")
            }
            Self::Corrupt { path, reason } => format!("Saved run state {path} is damaged: {reason}"),
        }
    }

    fn context(&self) -> Option<String> {
        Some("Run state is checkpointed after every phase and every creation step.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound { .. } => vec!["Start the run with 'brdflow run <run_id> --brd <file>'".to_string()],
            Self::AlreadyExists { .. } => vec![
                "Continue it with 'brdflow resume <run_id>'".to_string(),
                "Or pick a new run id".to_string(),
            ],
            Self::WriteFailed { .. } => vec!["Check free disk space and permissions under BRDFLOW_HOME".to_string()],
            Self::Corrupt { .. } => vec![
                "Remove the damaged checkpoint file; the previous checkpoint becomes authoritative".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Checkpoint
    }
}

/// State machine errors
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: PhaseId, to: PhaseId },

    #[error("Phase {phase} escalated: {reason}")]
    Escalated { phase: PhaseId, reason: String },

    #[error("Phase {phase} failed with code {code}: {message}")]
    Failed {
        phase: PhaseId,
        code: i32,
        message: String,
    },

    #[error("Run cancelled at phase {phase}")]
    Cancelled { phase: PhaseId },

    #[error("Run is already finished")]
    Finished,
}

impl UserFriendlyError for PhaseError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidTransition { from, to } => {
                format!("Cannot move from phase {from} to phase {to}")
            }
            Self::Escalated { phase, reason } => {
                format!("Phase {phase} needs attention: {reason}")
            }
            Self::Failed { phase, message, .. } => format!("Phase {phase} failed: {message}"),
            Self::Cancelled { phase } => format!("The run was cancelled during phase {phase}"),
            Self::Finished => "The run has already finished".to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Escalated { .. } | Self::Failed { .. } => Some(
                "A failure report and recovery artifact were written to the run's artifacts directory."
                    .to_string(),
            ),
            Self::InvalidTransition { .. } => {
                Some("Phases run strictly in order except for review reject/edit.".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Escalated { .. } | Self::Failed { .. } | Self::Cancelled { .. } => vec![
                "Resume from the last checkpoint with 'brdflow resume <run_id>'".to_string(),
                "See recovery.json for what was created, failed and remains".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidTransition { .. } => ErrorCategory::Validation,
            _ => ErrorCategory::Creation,
        }
    }
}

/// Gate reply errors
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Run '{run_id}' is not waiting at a gate")]
    NotAwaiting { run_id: String },

    #[error("{gate} timed out after {waited_secs}s without a reply")]
    Timeout { gate: GateKind, waited_secs: u64 },

    #[error("'{action}' is not a valid reply at {gate}")]
    ActionNotAllowed { gate: GateKind, action: String },

    #[error("Organization '{name}' is not one of the discovered options")]
    UnknownOrganization { name: String },
}

impl UserFriendlyError for GateError {
    fn user_message(&self) -> String {
        match self {
            Self::NotAwaiting { run_id } => format!("Run '{run_id}' is not waiting for a reply"),
            Self::Timeout { gate, waited_secs } => {
                format!("{gate} received no reply within {waited_secs} seconds")
            }
            Self::ActionNotAllowed { gate, action } => {
                format!("'{action}' cannot be used at {gate}")
            }
            Self::UnknownOrganization { name } => {
                format!("'{name}' is not an organization this account can access")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Timeout { .. } => Some("Unanswered gates escalate instead of choosing a default.".to_string()),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::ActionNotAllowed { gate: GateKind::A, .. } | Self::UnknownOrganization { .. } => vec![
                "Reply 'select_organization <name|id>' or 'create_organization <name>'".to_string(),
            ],
            Self::ActionNotAllowed { gate: GateKind::B, .. } => vec![
                "Reply 'approve', 'reject' or 'edit <field>:<value>'".to_string(),
            ],
            Self::Timeout { .. } => vec!["Resume the run and reply to the gate".to_string()],
            Self::NotAwaiting { .. } => vec!["Check the run with 'brdflow status <run_id>'".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Gate
    }
}

impl UserFriendlyError for LockError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        Some("Only one process may drive a run at a time.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            LockError::StaleLock { .. } => vec!["Re-run with --force to take over the lock".to_string()],
            _ => vec!["Wait for the other process to finish".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Concurrency
    }
}

impl UserFriendlyError for BrdflowError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(e) => e.user_message(),
            Self::Gateway(e) => e.user_message(),
            Self::Parse(e) => e.user_message(),
            Self::Structure(e) => e.user_message(),
            Self::Ledger(e) => e.user_message(),
            Self::Checkpoint(e) => e.user_message(),
            Self::Phase(e) => e.user_message(),
            Self::Gate(e) => e.user_message(),
            Self::Lock(e) => e.user_message(),
            Self::Io(e) => format!("File system error: {e}"),
            Self::CanonicalizationFailed { context, reason } => {
                format!("Could not serialize {context}: {reason}")
            }
            Self::ArtifactWriteFailed { path, reason } => {
                format!("Could not write {path}: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(e) => e.context(),
            Self::Gateway(e) => e.context(),
            Self::Parse(e) => e.context(),
            Self::Structure(e) => e.context(),
            Self::Ledger(e) => e.context(),
            Self::Checkpoint(e) => e.context(),
            Self::Phase(e) => e.context(),
            Self::Gate(e) => e.context(),
            Self::Lock(e) => e.context(),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(e) => e.suggestions(),
            Self::Gateway(e) => e.suggestions(),
            Self::Parse(e) => e.suggestions(),
            Self::Structure(e) => e.suggestions(),
            Self::Ledger(e) => e.suggestions(),
            Self::Checkpoint(e) => e.suggestions(),
            Self::Phase(e) => e.suggestions(),
            Self::Gate(e) => e.suggestions(),
            Self::Lock(e) => e.suggestions(),
            Self::Io(_) | Self::ArtifactWriteFailed { .. } => {
                vec!["Check permissions and free space under BRDFLOW_HOME".to_string()]
            }
            Self::CanonicalizationFailed { .. } => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(e) => e.category(),
            Self::Gateway(e) => e.category(),
            Self::Parse(e) => e.category(),
            Self::Structure(e) => e.category(),
            Self::Ledger(e) => e.category(),
            Self::Checkpoint(e) => e.category(),
            Self::Phase(e) => e.category(),
            Self::Gate(e) => e.category(),
            Self::Lock(e) => e.category(),
            Self::Io(_) | Self::ArtifactWriteFailed { .. } => ErrorCategory::Checkpoint,
            Self::CanonicalizationFailed { .. } => ErrorCategory::Validation,
        }
    }
}

impl BrdflowError {
    /// User-facing report with context and suggestions:
    ///
    /// ```text
    /// Error: <user message>
    ///
    /// Context: <context if available>
    ///
    /// Suggestions:
    ///   • <suggestion 1>
    /// ```
    #[must_use]
    pub fn display_for_user(&self) -> String {
        self.display_for_user_with_redactor(brdflow_redaction::default_redactor())
    }

    /// Same as [`display_for_user`](Self::display_for_user) with a caller-provided redactor.
    #[must_use]
    pub fn display_for_user_with_redactor(
        &self,
        redactor: &brdflow_redaction::SecretRedactor,
    ) -> String {
        let mut output = format!("Error: {}\n", self.user_message());

        if let Some(ctx) = self.context() {
            output.push_str(&format!("\nContext: {ctx}\n"));
        }

        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for suggestion in suggestions {
                output.push_str(&format!("  • {suggestion}\n"));
            }
        }

        redactor.redact_string(&output)
    }

    /// Map this error to the CLI exit code.
    #[must_use]
    pub fn to_exit_code(&self) -> crate::exit_codes::ExitCode {
        crate::exit_codes::error_to_exit_code_and_kind(self).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_codes::ExitCode;

    #[test]
    fn test_gateway_error_from_code_classifies() {
        let t = GatewayError::from_code("create_issue", 103, "rate limited".into(), 4);
        assert_eq!(t.class(), ErrorClass::Transient);
        assert_eq!(t.code(), 103);

        let p = GatewayError::from_code("create_issue", 201, "rejected".into(), 1);
        assert_eq!(p.class(), ErrorClass::Permanent);

        let c = GatewayError::from_code("get_issue", 404, "not found".into(), 1);
        assert!(c.is_not_found());
        assert_eq!(c.class(), ErrorClass::Client);
    }

    #[test]
    fn test_unauthorized_is_authentication_category() {
        let err = GatewayError::from_code("authenticate", 401, "expired".into(), 1);
        assert!(err.is_unauthorized());
        assert_eq!(err.category(), ErrorCategory::Authentication);
    }

    #[test]
    fn test_display_for_user_format() {
        let err = BrdflowError::Config(ConfigError::InvalidValue {
            key: "compensation_policy".into(),
            value: "must be 'delete' or 'mark_partial'".into(),
        });
        let text = err.display_for_user();
        assert!(text.starts_with("Error: Configuration 'compensation_policy'"));
        assert!(text.contains("\nContext: "));
        assert!(text.contains("  • Use 'delete' or 'mark_partial'"));
    }

    #[test]
    fn test_display_for_user_redacts_tokens() {
        let token = "z".repeat(40);
        let err = BrdflowError::Gateway(GatewayError::Transport(format!(
            "handshake rejected Bearer {token}"
        )));
        let text = err.display_for_user();
        assert!(!text.contains(&token));
    }

    #[test]
    fn test_to_exit_code_uses_mapping() {
        let err = BrdflowError::Gate(GateError::Timeout {
            gate: GateKind::B,
            waited_secs: 300,
        });
        assert_eq!(err.to_exit_code(), ExitCode::GATE_TIMEOUT);
    }

    #[test]
    fn test_structure_invalid_lists_violations() {
        let err = StructureError::Invalid {
            violations: vec!["depth 5 at X".into(), "empty title at Y".into()],
        };
        assert!(err.to_string().contains("depth 5 at X; empty title at Y"));
        assert_eq!(err.context().unwrap().lines().count(), 2);
    }
}
