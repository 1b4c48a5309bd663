use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use brdflow_utils::error::ParseError;
use brdflow_utils::types::RequirementKind;

/// One requirement extracted from the BRD. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: RequirementKind,
    pub confidence: f64,
}

impl Requirement {
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>, kind: RequirementKind, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            kind,
            confidence,
        }
    }
}

/// Input to a parser invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseRequest {
    pub text: String,
    /// Corrective instruction for the single low-confidence retry.
    pub instruction: Option<String>,
}

impl ParseRequest {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            instruction: None,
        }
    }

    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }
}

/// What a parser returns. The schema-conformance half of the confidence score
/// is computed by the evaluator, not reported by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub requirements: Vec<Requirement>,
    /// Document title (first heading), used for the Epic.
    pub title: Option<String>,
    pub semantic_score: f64,
}

/// Pluggable capability that turns BRD text into requirement records.
///
/// The remote model parser and the deterministic heuristic extractor are
/// interchangeable behind this trait.
#[async_trait]
pub trait BrdParser: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ParseError`] when the document is empty or the backend fails.
    async fn parse(&self, request: &ParseRequest) -> Result<ParseResult, ParseError>;

    fn name(&self) -> &'static str;
}
