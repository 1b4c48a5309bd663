use serde::{Deserialize, Serialize};
use std::fmt;

/// Target tracker platform.
///
/// Selects the tool server (`MCP_SERVER=ado|jira`), the fixed level set used by
/// the hierarchy builder and the field mapping used at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(any(test, feature = "test-utils"), derive(strum::VariantNames))]
#[cfg_attr(any(test, feature = "test-utils"), strum(serialize_all = "lowercase"))]
pub enum Platform {
    Ado,
    Jira,
}

impl Platform {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ado => "ado",
            Self::Jira => "jira",
        }
    }

    /// Logical level names, index 0 is depth 1.
    #[must_use]
    pub const fn levels(&self) -> [&'static str; 4] {
        match self {
            Self::Ado => ["Epic", "Feature", "User Story", "Task"],
            Self::Jira => ["Epic", "Story", "Task", "Sub-task"],
        }
    }

    /// Level name for a 1-based depth, clamped to the deepest level.
    #[must_use]
    pub fn level_name(&self, depth: usize) -> &'static str {
        let levels = self.levels();
        levels[depth.clamp(1, levels.len()) - 1]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ado" | "azure" | "azure-devops" => Ok(Self::Ado),
            "jira" => Ok(Self::Jira),
            other => Err(format!("unknown platform '{other}' (expected 'ado' or 'jira')")),
        }
    }
}

/// The ten phases of an orchestration run.
///
/// Phases execute strictly in order. The only back-edges are Review → Parse
/// (`reject`) and Review → Review (`edit`).
///
/// ```text
/// Auth → Discovery → Parse → Structure → ConfidenceGate → ProjectSetup
///      → TypeMapping → Review → CreateVerify → Close
/// ```
///
/// # Serialization
///
/// `PhaseId` serializes to its phase number (1..=10), which is what checkpoint
/// records and failure reports carry.
///
/// ```rust
/// use brdflow_utils::types::PhaseId;
///
/// assert_eq!(PhaseId::Review.number(), 8);
/// assert_eq!(PhaseId::from_number(9), Some(PhaseId::CreateVerify));
/// assert_eq!(PhaseId::Close.next(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PhaseId {
    /// Authenticate against the tool server.
    Auth,
    /// Resolve organization (ADO) and project.
    Discovery,
    /// Turn BRD text into requirement records.
    Parse,
    /// Build and validate the hierarchy.
    Structure,
    /// Re-affirm aggregate confidence; never halts.
    ConfidenceGate,
    /// Create the project if absent and wait for it.
    ProjectSetup,
    /// Map logical levels and fields to platform types.
    TypeMapping,
    /// Gate B: human review of the hierarchy.
    Review,
    /// Parent-first creation, then verification.
    CreateVerify,
    /// Clear the remote session and emit artifacts.
    Close,
}

impl PhaseId {
    pub const ALL: [PhaseId; 10] = [
        Self::Auth,
        Self::Discovery,
        Self::Parse,
        Self::Structure,
        Self::ConfidenceGate,
        Self::ProjectSetup,
        Self::TypeMapping,
        Self::Review,
        Self::CreateVerify,
        Self::Close,
    ];

    #[must_use]
    pub const fn number(&self) -> u8 {
        match self {
            Self::Auth => 1,
            Self::Discovery => 2,
            Self::Parse => 3,
            Self::Structure => 4,
            Self::ConfidenceGate => 5,
            Self::ProjectSetup => 6,
            Self::TypeMapping => 7,
            Self::Review => 8,
            Self::CreateVerify => 9,
            Self::Close => 10,
        }
    }

    #[must_use]
    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    /// Canonical lowercase name used in logs, checkpoint file names and reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Discovery => "discovery",
            Self::Parse => "parse",
            Self::Structure => "structure",
            Self::ConfidenceGate => "confidence_gate",
            Self::ProjectSetup => "project_setup",
            Self::TypeMapping => "type_mapping",
            Self::Review => "review",
            Self::CreateVerify => "create_verify",
            Self::Close => "close",
        }
    }

    /// The phase that follows on the forward path.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    /// Whether this phase may solicit input from a human.
    #[must_use]
    pub const fn is_gate_phase(&self) -> bool {
        matches!(self, Self::Discovery | Self::Review)
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.as_str())
    }
}

impl From<PhaseId> for u8 {
    fn from(phase: PhaseId) -> Self {
        phase.number()
    }
}

impl TryFrom<u8> for PhaseId {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Self::from_number(n).ok_or_else(|| format!("phase number {n} is outside 1..=10"))
    }
}

/// The two approval gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateKind {
    /// Organization selection (ADO discovery, conditional).
    A,
    /// Hierarchy review (always).
    B,
}

impl GateKind {
    #[must_use]
    pub const fn phase(&self) -> PhaseId {
        match self {
            Self::A => PhaseId::Discovery,
            Self::B => PhaseId::Review,
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("Gate A (organization selection)"),
            Self::B => f.write_str("Gate B (hierarchy review)"),
        }
    }
}

/// Functional vs non-functional requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementKind {
    Fr,
    Nfr,
}

impl RequirementKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fr => "fr",
            Self::Nfr => "nfr",
        }
    }
}

/// Error taxonomy surfaced by the tool gateway.
///
/// | Class | Codes | Handling |
/// |-------|-------|----------|
/// | `Transient` | 100–199 | retried with backoff |
/// | `Permanent` | 200–399 | phase failure, never retried |
/// | `Client` | 400+ | user-facing message or escalation |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Transient,
    Permanent,
    Client,
}

impl ErrorClass {
    /// Classify a normalized result code; `None` for success codes.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            100..=199 => Some(Self::Transient),
            200..=399 => Some(Self::Permanent),
            c if c >= 400 => Some(Self::Client),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Client => "client",
        })
    }
}

/// Error kinds recorded in failure reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(any(test, feature = "test-utils"), derive(strum::VariantNames))]
#[cfg_attr(any(test, feature = "test-utils"), strum(serialize_all = "snake_case"))]
pub enum ErrorKind {
    CliArgs,
    GatewayFailure,
    ParseFailure,
    StructureFailure,
    LedgerConflict,
    CheckpointFailure,
    LockHeld,
    GateTimeout,
    Escalated,
    Cancelled,
    Unknown,
}

/// Source of a configuration value.
///
/// ```rust
/// use brdflow_utils::types::ConfigSource;
///
/// let json = serde_json::to_string(&ConfigSource::Cli).unwrap();
/// assert_eq!(json, r#""cli""#);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// Value provided via CLI argument (highest precedence).
    Cli,
    /// Value loaded from configuration file.
    Config,
    /// Value provided programmatically (e.g., `Config::builder()`).
    Programmatic,
    /// Built-in default value (lowest precedence).
    Default,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::VariantNames;

    #[test]
    fn test_phase_numbering_roundtrip() {
        for (idx, phase) in PhaseId::ALL.iter().enumerate() {
            assert_eq!(usize::from(phase.number()), idx + 1);
            assert_eq!(PhaseId::from_number(phase.number()), Some(*phase));
        }
        assert_eq!(PhaseId::from_number(0), None);
        assert_eq!(PhaseId::from_number(11), None);
    }

    #[test]
    fn test_phase_serializes_as_number() {
        let json = serde_json::to_string(&PhaseId::CreateVerify).unwrap();
        assert_eq!(json, "9");
        let back: PhaseId = serde_json::from_str("4").unwrap();
        assert_eq!(back, PhaseId::Structure);
        assert!(serde_json::from_str::<PhaseId>("12").is_err());
    }

    #[test]
    fn test_phase_next_is_sequential() {
        assert_eq!(PhaseId::Auth.next(), Some(PhaseId::Discovery));
        assert_eq!(PhaseId::Review.next(), Some(PhaseId::CreateVerify));
        assert_eq!(PhaseId::Close.next(), None);
    }

    #[test]
    fn test_only_discovery_and_review_are_gate_phases() {
        let gates: Vec<_> = PhaseId::ALL.iter().filter(|p| p.is_gate_phase()).collect();
        assert_eq!(gates, vec![&PhaseId::Discovery, &PhaseId::Review]);
        assert_eq!(GateKind::A.phase(), PhaseId::Discovery);
        assert_eq!(GateKind::B.phase(), PhaseId::Review);
    }

    #[test]
    fn test_platform_levels() {
        assert_eq!(Platform::Ado.level_name(1), "Epic");
        assert_eq!(Platform::Ado.level_name(3), "User Story");
        assert_eq!(Platform::Jira.level_name(4), "Sub-task");
        assert_eq!(Platform::Jira.level_name(9), "Sub-task");
        assert_eq!("Jira".parse::<Platform>(), Ok(Platform::Jira));
        assert!("trello".parse::<Platform>().is_err());
        assert_eq!(Platform::VARIANTS, &["ado", "jira"]);
    }

    #[test]
    fn test_error_class_from_code_boundaries() {
        assert_eq!(ErrorClass::from_code(0), None);
        assert_eq!(ErrorClass::from_code(100), Some(ErrorClass::Transient));
        assert_eq!(ErrorClass::from_code(199), Some(ErrorClass::Transient));
        assert_eq!(ErrorClass::from_code(200), Some(ErrorClass::Permanent));
        assert_eq!(ErrorClass::from_code(299), Some(ErrorClass::Permanent));
        assert_eq!(ErrorClass::from_code(404), Some(ErrorClass::Client));
        assert!(ErrorClass::Transient.is_retryable());
        assert!(!ErrorClass::Client.is_retryable());
    }

    #[test]
    fn test_error_kind_names_are_snake_case() {
        assert!(ErrorKind::VARIANTS.contains(&"gate_timeout"));
        let json = serde_json::to_string(&ErrorKind::LedgerConflict).unwrap();
        assert_eq!(json, r#""ledger_conflict""#);
    }
}
