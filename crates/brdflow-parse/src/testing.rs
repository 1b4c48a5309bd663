//! Test helper; not part of public API stability guarantees.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use brdflow_utils::error::ParseError;

use crate::evaluator::schema_score;
use crate::heuristic::HeuristicExtractor;
use crate::types::{BrdParser, ParseRequest, ParseResult};

enum Script {
    /// Heuristic extraction reported at these composite confidences, in order.
    Confidences(VecDeque<f64>, f64),
    /// No requirements, with this semantic score.
    Empty(f64),
    Fail,
}

/// Parser double with scripted confidence.
///
/// Requirements come from the heuristic extractor; the semantic score is
/// chosen so the evaluator's composite score equals the scripted value.
pub struct ScriptedParser {
    script: Mutex<Script>,
    calls: AtomicU32,
    instructions: Mutex<Vec<Option<String>>>,
}

impl ScriptedParser {
    fn from_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
            instructions: Mutex::new(Vec::new()),
        }
    }

    /// The last confidence repeats once the list is exhausted.
    #[must_use]
    pub fn with_confidences(confidences: &[f64]) -> Self {
        let last = confidences.last().copied().unwrap_or(0.9);
        Self::from_script(Script::Confidences(confidences.iter().copied().collect(), last))
    }

    #[must_use]
    pub fn empty_with_semantic(semantic: f64) -> Self {
        Self::from_script(Script::Empty(semantic))
    }

    #[must_use]
    pub fn failing() -> Self {
        Self::from_script(Script::Fail)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    #[allow(clippy::unwrap_used)]
    pub fn instructions(&self) -> Vec<Option<String>> {
        self.instructions.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrdParser for ScriptedParser {
    #[allow(clippy::unwrap_used)]
    async fn parse(&self, request: &ParseRequest) -> Result<ParseResult, ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.instructions.lock().unwrap().push(request.instruction.clone());

        let mut script = self.script.lock().unwrap();
        match &mut *script {
            Script::Fail => Err(ParseError::Backend("scripted failure".to_string())),
            Script::Empty(semantic) => Ok(ParseResult {
                requirements: Vec::new(),
                title: None,
                semantic_score: *semantic,
            }),
            Script::Confidences(queue, last) => {
                let target = queue.pop_front().unwrap_or(*last);
                let mut result = HeuristicExtractor::new().extract(&request.text)?;
                for req in &mut result.requirements {
                    req.confidence = target;
                }
                let schema = schema_score(&result.requirements);
                result.semantic_score = (2.0 * target - schema).clamp(0.0, 1.0);
                Ok(result)
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
