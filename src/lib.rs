//! brdflow - checkpointed BRD to Azure DevOps / Jira orchestration
//!
//! A run parses a business requirements document, builds a four-level work
//! item hierarchy, stops for operator review, and creates the hierarchy
//! parent-first through a tool server, verifying every item it created.
//! State is checkpointed after every step, so `brdflow resume` picks up
//! where a crash or cancellation left off without creating duplicates.
//!
//! # Library use
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use brdflow::{Config, Orchestrator, Platform, RunOutcome};
//! use brdflow_parse::HeuristicExtractor;
//!
//! # async fn demo() -> Result<(), brdflow::BrdflowError> {
//! let config = Config::defaults();
//! let gateway = brdflow_gateway::from_config(&config, Platform::Jira)?;
//! let mut run = Orchestrator::start(
//!     config,
//!     camino::Utf8Path::new(".brdflow"),
//!     "shop-1",
//!     "# Online Store\n- FR1: Checkout\n",
//!     gateway,
//!     Arc::new(HeuristicExtractor::new()),
//!     false,
//! )?;
//! if let RunOutcome::AwaitingGate { prompt, .. } = run.run().await? {
//!     println!("{prompt}");
//!     run.reply("approve").await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Status and failure reports are emitted as canonical JSON (JCS); use
//! [`emit_jcs`] for the same form in integrations.

pub mod cli;
pub mod run_id;

pub use brdflow_config::{CliArgs, Config, ConfigBuilder};
pub use brdflow_engine::{GateReply, OrchestrationState, Orchestrator, RunOutcome, RunStatus, RunStatusReport};
pub use brdflow_utils::canonicalization::emit_jcs;
pub use brdflow_utils::types::{GateKind, PhaseId, Platform};
pub use brdflow_utils::{BrdflowError, ExitCode};
