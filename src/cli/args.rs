//! CLI argument definitions (clap derive)

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use brdflow_utils::types::Platform;

/// brdflow - turn a business requirements document into tracked work
#[derive(Parser, Debug)]
#[command(name = "brdflow")]
#[command(about = "Turn a BRD into an Azure DevOps or Jira project with a verified work-item hierarchy")]
#[command(long_about = r#"
brdflow parses a business requirements document, builds an Epic / Feature /
Story / Task hierarchy, and creates it on Azure DevOps or Jira through a tool
server. Runs are checkpointed after every step and can be resumed.

EXAMPLES:
  # Start a run against Jira
  brdflow run shop-1 --platform jira --brd requirements.md

  # Answer the hierarchy review gate
  brdflow reply shop-1 approve
  brdflow reply shop-1 "edit shop-1-0004.title:Guest checkout"

  # Wait for gate replies on stdin instead of exiting at a gate
  brdflow run shop-1 --platform ado --brd requirements.md --interactive

  # Inspect, stop or continue a run
  brdflow status shop-1 --json
  brdflow cancel shop-1
  brdflow resume shop-1

GATES:
  Gate A (ADO only, when several organizations qualify):
    select_organization <name|id> | create_organization <name>
  Gate B (always): approve | reject | edit <field>:<value>

EXIT CODES:
  0 completed, 3 awaiting a gate reply, 4 partial, 10 gate timeout,
  11 cancelled, 12 escalated, 70 tool server failure

CONFIGURATION:
  CLI flags > .brdflow/config.toml (searched upward) > defaults.
  Use --config to point at a specific file and 'brdflow config --show' to
  see every effective value and where it came from.
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Retries for transient tool failures
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Per-call timeout in milliseconds
    #[arg(long, global = true)]
    pub call_timeout_ms: Option<u64>,

    /// Minimum delay before every tool call in milliseconds
    #[arg(long, global = true)]
    pub min_wait_before_call_ms: Option<u64>,

    /// Seconds a gate waits for a reply before escalating
    #[arg(long, global = true)]
    pub gate_timeout_s: Option<u64>,

    /// What to do when a creation level fails too often: delete or mark_partial
    #[arg(long, global = true)]
    pub compensation_policy: Option<String>,

    /// Parse confidence needed to proceed without a second pass
    #[arg(long, global = true)]
    pub confidence_threshold: Option<f64>,

    /// Tool server transport: stdio or http
    #[arg(long, global = true)]
    pub transport: Option<String>,

    /// Tool server command for the stdio transport
    #[arg(long, global = true)]
    pub tool_command: Option<String>,

    /// Tool server endpoint for the http transport
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// ADO organization to prefer when several qualify
    #[arg(long, global = true)]
    pub organization: Option<String>,

    /// Project name or key to use or create
    #[arg(long, global = true)]
    pub project: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new run
    Run {
        /// Run id; names the run directory
        run_id: String,

        /// Target platform
        #[arg(long, value_parser = parse_platform)]
        platform: Platform,

        /// BRD file, or '-' for stdin
        #[arg(long)]
        brd: String,

        /// Wait for gate replies on stdin instead of exiting at a gate
        #[arg(long)]
        interactive: bool,

        /// Take over the run lock even if another process seems to hold it
        #[arg(long)]
        force: bool,
    },

    /// Answer the gate a run is waiting at
    Reply {
        run_id: String,

        /// Reply text, e.g. 'approve' or 'select_organization contoso'
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Take over the run lock even if another process seems to hold it
        #[arg(long)]
        force: bool,
    },

    /// Continue a suspended or stopped run from its latest checkpoint
    Resume {
        run_id: String,

        /// Wait for gate replies on stdin instead of exiting at a gate
        #[arg(long)]
        interactive: bool,

        /// Take over the run lock even if another process seems to hold it
        #[arg(long)]
        force: bool,
    },

    /// Show where a run stands
    Status {
        run_id: String,

        /// Output canonical JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask the process driving a run to stop at its next phase boundary
    Cancel { run_id: String },

    /// Configuration commands
    Config {
        /// Print every effective value and its source
        #[arg(long)]
        show: bool,
    },
}

fn parse_platform(value: &str) -> Result<Platform, String> {
    value.parse()
}

/// The clap command, for tests and completions.
#[must_use]
pub fn build_cli() -> clap::Command {
    <Cli as clap::CommandFactory>::command()
}
