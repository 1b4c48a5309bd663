//! Orchestration engine for brdflow
//!
//! [`Orchestrator`] turns a BRD into a project and a work-item hierarchy on
//! Azure DevOps or Jira. It runs ten checkpointed phases, halts at the two
//! operator gates, creates items parent-first behind the idempotency ledger,
//! compensates levels that fail too often and verifies what it created.

pub mod artifacts;
mod cancel;
pub mod mapping;
mod orchestrator;
pub mod poll;
mod reply;
pub mod state;
pub mod status;
pub mod transition;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cancel::CancelToken;
pub use orchestrator::{Orchestrator, RunOutcome};
pub use reply::{GateReply, usage};
pub use state::{OrchestrationState, RunStatus};
pub use status::RunStatusReport;
