//! CLI entry point and dispatch
//!
//! `run()` parses arguments, initializes logging, discovers the config,
//! creates the tokio runtime and dispatches. It handles all output including
//! errors; `main` only maps the returned code to the process exit status.

use clap::Parser;

use brdflow_config::{CliArgs, Config};
use brdflow_redaction::SecretRedactor;
use brdflow_utils::error::{BrdflowError, ConfigError};
use brdflow_utils::exit_codes::ExitCode;
use brdflow_utils::logging::{LogFormat, init_tracing};
use brdflow_utils::paths::brdflow_home;

use super::args::{Cli, Commands};
use super::commands;

/// Run the CLI. `Err` carries the exit code after the error was printed.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    if let Err(e) = init_tracing(cli.verbose, format) {
        eprintln!("warning: logging disabled: {e}");
    }

    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        max_retries: cli.max_retries,
        call_timeout_ms: cli.call_timeout_ms,
        min_wait_before_call_ms: cli.min_wait_before_call_ms,
        gate_timeout_s: cli.gate_timeout_s,
        compensation_policy: cli.compensation_policy.clone(),
        confidence_threshold: cli.confidence_threshold,
        transport: cli.transport.clone(),
        tool_command: cli.tool_command.clone(),
        endpoint: cli.endpoint.clone(),
        organization: cli.organization.clone(),
        project: cli.project.clone(),
    };

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => return Err(report(&err, brdflow_redaction::default_redactor())),
    };

    let redactor = match SecretRedactor::from_config(&config) {
        Ok(redactor) => redactor,
        Err(e) => {
            let err = BrdflowError::Config(ConfigError::InvalidValue {
                key: "security".to_string(),
                value: e.to_string(),
            });
            eprint!("{}", err.display_for_user());
            return Err(err.to_exit_code());
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let home = brdflow_home();
    let result = rt.block_on(async {
        match cli.command {
            Commands::Run {
                run_id,
                platform,
                brd,
                interactive,
                force,
            } => commands::execute_run(&home, &run_id, platform, &brd, interactive, force, &config).await,
            Commands::Reply { run_id, text, force } => {
                commands::execute_reply(&home, &run_id, &text.join(" "), force, &config).await
            }
            Commands::Resume {
                run_id,
                interactive,
                force,
            } => commands::execute_resume(&home, &run_id, interactive, force, &config).await,
            Commands::Status { run_id, json } => commands::execute_status(&home, &run_id, json, &config),
            Commands::Cancel { run_id } => commands::execute_cancel(&home, &run_id),
            Commands::Config { show } => commands::execute_config(show, &config),
        }
    });

    match result {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(err) => Err(report(&err, &redactor)),
    }
}

/// Print an error for the user and pick its exit code.
fn report(err: &anyhow::Error, redactor: &SecretRedactor) -> ExitCode {
    if let Some(brdflow_error) = err.downcast_ref::<BrdflowError>() {
        eprint!("{}", brdflow_error.display_for_user_with_redactor(redactor));
        return brdflow_error.to_exit_code();
    }
    eprintln!("Error: {}", redactor.redact_string(&format!("{err:#}")));
    ExitCode::INTERNAL
}
