//! BRD parsing for brdflow
//!
//! [`BrdParser`] is the pluggable parsing capability. [`parse_brd`] runs the
//! configured parser through the [`ConfidenceEvaluator`] and switches to the
//! [`HeuristicExtractor`] when the score is below the retry floor.

mod driver;
mod evaluator;
mod heuristic;
mod remote;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use driver::{ParseOutcome, ParseRoute, parse_brd, parser_from_config};
pub use evaluator::{Action, ConfidenceEvaluator, Evaluation, MAX_TITLE_LEN, schema_score};
pub use heuristic::HeuristicExtractor;
pub use remote::RemoteParser;
pub use types::{BrdParser, ParseRequest, ParseResult, Requirement};
