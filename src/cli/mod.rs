//! Command-line interface for brdflow
//!
//! - `args`: clap definitions
//! - `run`: entry point, config discovery, error reporting
//! - `commands`: one handler per subcommand

pub mod args;
mod commands;
mod run;

pub use args::{Cli, Commands, build_cli};
pub use run::run;
