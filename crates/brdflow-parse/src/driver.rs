//! Confidence-routed parse
//!
//! Runs the primary parser, scores the result and follows the evaluator:
//! proceed, one corrective retry, or a switch to the heuristic extractor.
//! Low confidence alone never halts the pipeline.

use serde::{Deserialize, Serialize};

use brdflow_config::ParseConfig;
use brdflow_utils::error::ParseError;

use crate::evaluator::{Action, ConfidenceEvaluator, Evaluation};
use crate::heuristic::HeuristicExtractor;
use crate::remote::RemoteParser;
use crate::types::{BrdParser, ParseRequest, ParseResult, Requirement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseRoute {
    Proceeded,
    Retried,
    Fallback,
}

/// Accepted parse, as stored in orchestration state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub requirements: Vec<Requirement>,
    pub title: Option<String>,
    pub confidence: f64,
    pub route: ParseRoute,
    /// Accepted below the confidence threshold.
    pub low_confidence: bool,
    pub attempts: u32,
    pub parser: String,
}

fn corrective_instruction(score: f64) -> String {
    format!(
        "The previous extraction scored {score:.2}. Return every requirement as its own record \
         with a non-empty title under 255 characters, classify each as fr or nfr, and put \
         supporting detail in the description."
    )
}

/// Parse `text`, retrying once or falling back as the score dictates.
///
/// # Errors
///
/// [`ParseError::EmptyDocument`] when neither parser finds any statement.
pub async fn parse_brd(
    primary: &dyn BrdParser,
    evaluator: &ConfidenceEvaluator,
    text: &str,
) -> Result<ParseOutcome, ParseError> {
    let request = ParseRequest::new(text);
    let first = match primary.parse(&request).await {
        Ok(result) => result,
        Err(ParseError::EmptyDocument) => return Err(ParseError::EmptyDocument),
        Err(e) => {
            tracing::warn!(parser = primary.name(), error = %e, "Parser failed, using heuristic extraction");
            return fallback(evaluator, text, 1);
        }
    };

    let Evaluation { score, action } = evaluator.evaluate(&first);
    match action {
        Action::Proceed => {
            tracing::info!(parser = primary.name(), confidence = score, "Parse accepted");
            Ok(accept(first, score, ParseRoute::Proceeded, false, 1, primary.name()))
        }
        Action::RetryOnce => {
            tracing::info!(parser = primary.name(), confidence = score, "Low confidence, retrying once");
            let retry = request.with_instruction(corrective_instruction(score));
            let (best, best_score) = match primary.parse(&retry).await {
                Ok(second) => {
                    let second_score = evaluator.evaluate(&second).score;
                    if second_score >= score {
                        (second, second_score)
                    } else {
                        (first, score)
                    }
                }
                Err(e) => {
                    tracing::warn!(parser = primary.name(), error = %e, "Retry failed, keeping first parse");
                    (first, score)
                }
            };
            if best.requirements.is_empty() {
                return fallback(evaluator, text, 2);
            }
            let low = best_score < evaluator.threshold;
            if low {
                tracing::warn!(confidence = best_score, "Proceeding with low-confidence parse");
            }
            Ok(accept(best, best_score, ParseRoute::Retried, low, 2, primary.name()))
        }
        Action::Fallback => {
            tracing::info!(parser = primary.name(), confidence = score, "Confidence below floor, using heuristic extraction");
            fallback(evaluator, text, 1)
        }
    }
}

fn fallback(evaluator: &ConfidenceEvaluator, text: &str, attempts: u32) -> Result<ParseOutcome, ParseError> {
    let extractor = HeuristicExtractor::new();
    let result = extractor.extract(text)?;
    let score = evaluator.evaluate(&result).score;
    Ok(accept(
        result,
        score,
        ParseRoute::Fallback,
        score < evaluator.threshold,
        attempts + 1,
        extractor.name(),
    ))
}

fn accept(
    result: ParseResult,
    confidence: f64,
    route: ParseRoute,
    low_confidence: bool,
    attempts: u32,
    parser: &str,
) -> ParseOutcome {
    ParseOutcome {
        requirements: result.requirements,
        title: result.title,
        confidence,
        route,
        low_confidence,
        attempts,
        parser: parser.to_string(),
    }
}

/// The configured primary parser: the remote model when an endpoint is set,
/// the heuristic extractor otherwise.
///
/// # Errors
///
/// Returns [`ParseError::Backend`] if the HTTP client cannot be built.
pub fn parser_from_config(config: &ParseConfig) -> Result<Box<dyn BrdParser>, ParseError> {
    match &config.endpoint {
        Some(endpoint) => Ok(Box::new(RemoteParser::new(endpoint.clone())?)),
        None => Ok(Box::new(HeuristicExtractor::new())),
    }
}
