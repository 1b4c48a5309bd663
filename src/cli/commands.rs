//! Command handlers
//!
//! Each handler returns the exit code for a completed command; errors bubble
//! up as `anyhow::Error` wrapping a [`BrdflowError`] where one exists.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tokio::io::{AsyncReadExt, BufReader};

use brdflow_config::Config;
use brdflow_engine::{CancelToken, Orchestrator, RunOutcome, RunStatus, RunStatusReport};
use brdflow_lock::FileLock;
use brdflow_parse::{BrdParser, parser_from_config};
use brdflow_utils::BrdflowError;
use brdflow_utils::canonicalization::emit_jcs;
use brdflow_utils::exit_codes::ExitCode;
use brdflow_utils::paths::RunPaths;
use brdflow_utils::types::{GateKind, Platform};

use crate::run_id::sanitize_run_id;

fn run_id(raw: &str) -> Result<String, BrdflowError> {
    Ok(sanitize_run_id(raw)?)
}

fn parser(config: &Config) -> Result<Arc<dyn BrdParser>, BrdflowError> {
    Ok(Arc::from(parser_from_config(&config.parse)?))
}

async fn read_brd(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read the BRD from stdin")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("Failed to read the BRD from {source}"))
}

fn open(home: &Utf8Path, run_id: &str, force: bool, config: &Config) -> Result<Orchestrator, BrdflowError> {
    Orchestrator::open(
        config.clone(),
        home,
        run_id,
        force,
        |platform| brdflow_gateway::from_config(config, platform),
        parser(config)?,
    )
}

/// `brdflow run`
pub(super) async fn execute_run(
    home: &Utf8Path,
    raw_run_id: &str,
    platform: Platform,
    brd: &str,
    interactive: bool,
    force: bool,
    config: &Config,
) -> Result<ExitCode> {
    let run_id = run_id(raw_run_id)?;
    let text = read_brd(brd).await?;
    let gateway = brdflow_gateway::from_config(config, platform).map_err(BrdflowError::from)?;
    let orchestrator = Orchestrator::start(
        config.clone(),
        home,
        &run_id,
        &text,
        gateway,
        parser(config)?,
        force,
    )?;
    println!("Run '{run_id}' started on {platform}");
    drive(orchestrator, Drive::Run, interactive).await
}

/// `brdflow resume`
pub(super) async fn execute_resume(
    home: &Utf8Path,
    raw_run_id: &str,
    interactive: bool,
    force: bool,
    config: &Config,
) -> Result<ExitCode> {
    let run_id = run_id(raw_run_id)?;
    let orchestrator = open(home, &run_id, force, config)?;
    println!(
        "Resuming run '{run_id}' at phase {}",
        orchestrator.state().phase
    );
    drive(orchestrator, Drive::Resume, interactive).await
}

/// `brdflow reply`
///
/// When another process holds the run (an interactive run waiting at the
/// gate), the reply is handed to it through the run's reply file.
pub(super) async fn execute_reply(
    home: &Utf8Path,
    raw_run_id: &str,
    text: &str,
    force: bool,
    config: &Config,
) -> Result<ExitCode> {
    let run_id = run_id(raw_run_id)?;
    let paths = RunPaths::new(home, &run_id);
    if !force && FileLock::is_held(paths.root()).map_err(BrdflowError::from)? {
        Orchestrator::deliver_reply(home, &run_id, text)?;
        println!("Reply handed to the process driving run '{run_id}'");
        return Ok(ExitCode::SUCCESS);
    }

    let orchestrator = open(home, &run_id, force, config)?;
    drive(orchestrator, Drive::Reply(text.to_string()), false).await
}

/// `brdflow status`
pub(super) fn execute_status(home: &Utf8Path, raw_run_id: &str, json: bool, config: &Config) -> Result<ExitCode> {
    let run_id = run_id(raw_run_id)?;
    let report = Orchestrator::status(config, home, &run_id)?;
    if json {
        println!("{}", emit_jcs(&report)?);
    } else {
        print_status(&report);
    }
    Ok(ExitCode::SUCCESS)
}

/// `brdflow cancel`
pub(super) fn execute_cancel(home: &Utf8Path, raw_run_id: &str) -> Result<ExitCode> {
    let run_id = run_id(raw_run_id)?;
    Orchestrator::request_cancel(home, &run_id)?;
    println!("Cancellation requested for run '{run_id}'");
    Ok(ExitCode::SUCCESS)
}

/// `brdflow config`
pub(super) fn execute_config(show: bool, config: &Config) -> Result<ExitCode> {
    if !show {
        println!("Use 'brdflow config --show' to print the effective configuration");
        return Ok(ExitCode::SUCCESS);
    }
    let mut entries: Vec<_> = config.effective_config().into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, (value, source)) in entries {
        println!("{key:<width$} = {value}  ({source})");
    }
    Ok(ExitCode::SUCCESS)
}

enum Drive {
    Run,
    Resume,
    Reply(String),
}

/// Advance the run, optionally answering gates from stdin, and print where
/// it ended up.
async fn drive(mut orchestrator: Orchestrator, how: Drive, interactive: bool) -> Result<ExitCode> {
    let ctrl_c = watch_ctrl_c(orchestrator.cancel_token());
    let result = advance(&mut orchestrator, how, interactive).await;
    ctrl_c.abort();

    let outcome = result?;
    print_outcome(orchestrator.run_id(), &outcome);
    Ok(outcome.exit_code())
}

async fn advance(orchestrator: &mut Orchestrator, how: Drive, interactive: bool) -> Result<RunOutcome, BrdflowError> {
    let outcome = match how {
        Drive::Run => orchestrator.run().await?,
        Drive::Resume => orchestrator.resume().await?,
        Drive::Reply(text) => orchestrator.reply(&text).await?,
    };
    if !interactive || !matches!(outcome, RunOutcome::AwaitingGate { .. }) {
        return Ok(outcome);
    }
    let stdin = BufReader::new(tokio::io::stdin());
    orchestrator.wait_for_reply(stdin, show_gate).await
}

fn watch_ctrl_c(token: CancelToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, stopping at the next phase boundary");
            token.cancel();
        }
    })
}

fn show_gate(gate: GateKind, prompt: &str) {
    println!("\n{gate}\n\n{prompt}\n");
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn print_outcome(run_id: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::AwaitingGate { gate, prompt } => {
            println!("\nRun '{run_id}' is waiting at {gate}\n\n{prompt}\n");
            println!("Answer with: brdflow reply {run_id} <reply>");
        }
        RunOutcome::Completed {
            status,
            created,
            verified,
            failed,
            unverifiable,
            artifacts_dir,
        } => {
            let headline = match status {
                RunStatus::Completed => "completed",
                _ => "closed with partial results",
            };
            println!("Run '{run_id}' {headline}");
            println!("  created:      {created}");
            println!("  verified:     {verified}");
            println!("  failed:       {failed}");
            println!("  unverifiable: {unverifiable}");
            println!("  artifacts:    {artifacts_dir}");
        }
    }
}

fn print_status(report: &RunStatusReport) {
    println!("{}", report.headline());
    if let Some(project) = &report.project {
        println!("  project:      {project}");
    }
    println!(
        "  items:        {} planned, {} created, {} verified, {} failed, {} unverifiable",
        report.total_items, report.created, report.verified, report.failed, report.unverifiable
    );
    if report.write_in_flight {
        println!("  a creation was in flight when the run stopped; resume reconciles it");
    }
    println!(
        "  lock:         {}",
        if report.lock_held { "held" } else { "free" }
    );
    if let Some(error) = &report.last_error {
        println!("  last error:   {error}");
    }
    if let Some(gate) = &report.gate {
        println!("\n{}", gate.prompt);
    }
}
