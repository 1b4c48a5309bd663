//! Confidence evaluation
//!
//! The score of a parse is the equal-weighted mean of the parser's semantic
//! score and a schema-conformance score computed here. The score maps to an
//! [`Action`]:
//!
//! | Score | Action |
//! |-------|--------|
//! | `>= threshold` (0.70) | `Proceed` |
//! | `>= retry_floor` (0.60) | `RetryOnce` |
//! | below | `Fallback` |

use serde::{Deserialize, Serialize};

use brdflow_config::ParseConfig;

use crate::types::{ParseResult, Requirement};

/// Longest title a tracker accepts without truncation.
pub const MAX_TITLE_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Proceed,
    RetryOnce,
    Fallback,
}

/// Composite score of one parse and the action it routes to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub action: Action,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceEvaluator {
    pub threshold: f64,
    pub retry_floor: f64,
}

impl Default for ConfidenceEvaluator {
    fn default() -> Self {
        Self {
            threshold: 0.70,
            retry_floor: 0.60,
        }
    }
}

impl ConfidenceEvaluator {
    #[must_use]
    pub fn from_config(config: &ParseConfig) -> Self {
        Self {
            threshold: config.confidence_threshold,
            retry_floor: config.retry_floor,
        }
    }

    /// Composite score of a parse result, in `[0, 1]`.
    #[must_use]
    pub fn score(&self, result: &ParseResult) -> f64 {
        let semantic = result.semantic_score.clamp(0.0, 1.0);
        (semantic + schema_score(&result.requirements)) / 2.0
    }

    #[must_use]
    pub fn route(&self, score: f64) -> Action {
        if score >= self.threshold {
            Action::Proceed
        } else if score >= self.retry_floor {
            Action::RetryOnce
        } else {
            Action::Fallback
        }
    }

    #[must_use]
    pub fn evaluate(&self, result: &ParseResult) -> Evaluation {
        let score = self.score(result);
        Evaluation {
            score,
            action: self.route(score),
        }
    }
}

fn conforms(req: &Requirement) -> bool {
    let title = req.title.trim();
    !title.is_empty()
        && title.chars().count() <= MAX_TITLE_LEN
        && (0.0..=1.0).contains(&req.confidence)
}

/// Fraction of requirements that satisfy the record schema. An empty set
/// scores zero.
#[must_use]
pub fn schema_score(requirements: &[Requirement]) -> f64 {
    if requirements.is_empty() {
        return 0.0;
    }
    let ok = requirements.iter().filter(|r| conforms(r)).count();
    ok as f64 / requirements.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use brdflow_utils::types::RequirementKind;
    use proptest::prelude::*;

    fn result(semantic: f64, titles: &[&str]) -> ParseResult {
        ParseResult {
            requirements: titles
                .iter()
                .map(|t| Requirement::new(*t, "", RequirementKind::Fr, 0.9))
                .collect(),
            title: None,
            semantic_score: semantic,
        }
    }

    #[test]
    fn test_routing_thresholds() {
        let e = ConfidenceEvaluator::default();
        assert_eq!(e.route(0.85), Action::Proceed);
        assert_eq!(e.route(0.70), Action::Proceed);
        assert_eq!(e.route(0.65), Action::RetryOnce);
        assert_eq!(e.route(0.60), Action::RetryOnce);
        assert_eq!(e.route(0.40), Action::Fallback);
    }

    #[test]
    fn test_score_is_mean_of_semantic_and_schema() {
        let e = ConfidenceEvaluator::default();
        assert!((e.score(&result(0.84, &["a", "b"])) - 0.92).abs() < 1e-9);
        // One of two titles is blank
        assert!((e.score(&result(1.0, &["a", "  "])) - 0.75).abs() < 1e-9);
        assert!((e.score(&result(0.8, &[])) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_overlong_title_fails_schema() {
        let long = "x".repeat(MAX_TITLE_LEN + 1);
        assert!((schema_score(&result(0.0, &[&long, "ok"]).requirements) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_routes_composite_score() {
        let e = ConfidenceEvaluator::default();
        // 0.9 semantic, all titles conform: (0.9 + 1.0) / 2
        let eval = e.evaluate(&result(0.9, &["a", "b"]));
        assert!((eval.score - 0.95).abs() < 1e-9);
        assert_eq!(eval.action, Action::Proceed);
        // Strong semantic score cannot hide an empty extraction
        assert_eq!(e.evaluate(&result(1.0, &[])).action, Action::Fallback);
        assert_eq!(e.evaluate(&result(0.3, &["a"])).action, Action::RetryOnce);
    }

    proptest! {
        #[test]
        fn prop_route_is_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let e = ConfidenceEvaluator::default();
            let rank = |act: Action| match act {
                Action::Fallback => 0,
                Action::RetryOnce => 1,
                Action::Proceed => 2,
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(rank(e.route(lo)) <= rank(e.route(hi)));
        }
    }
}
