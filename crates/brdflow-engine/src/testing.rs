//! Fixtures for driving the orchestrator against the in-process tool server.
//!
//! Test helper; not part of public API stability guarantees.

use std::sync::Arc;

use camino::Utf8Path;

use brdflow_config::Config;
use brdflow_gateway::testing::MockToolServer;
use brdflow_gateway::{GatewaySettings, ToolGateway};
use brdflow_parse::BrdParser;
use brdflow_parse::testing::ScriptedParser;
use brdflow_redaction::SecretRedactor;
use brdflow_utils::error::BrdflowError;
use brdflow_utils::types::Platform;

use crate::orchestrator::Orchestrator;

/// BRD whose hierarchy has twelve items: an epic, two features, four
/// stories, three tasks and two NFR leaves.
pub const SHOP_BRD: &str = "\
# Online Store

## Functional Requirements
- FR1: User registration: create an account with email; verify the email address
- FR2: Product search
- FR3: Shopping cart: keep items between sessions
- FR4: Checkout

## Non-Functional Requirements
- NFR1: Page load: pages render within 2 seconds
- NFR2: Security - all traffic uses TLS
";

/// Gateway whose transport is a clone of `mock`; the test keeps `mock` to
/// script failures and inspect calls.
#[must_use]
pub fn mock_gateway(platform: Platform, mock: &MockToolServer, config: &Config) -> ToolGateway {
    ToolGateway::new(
        platform,
        Box::new(mock.clone()),
        GatewaySettings::from_config(&config.gateway),
        SecretRedactor::default(),
    )
}

/// Parser scoring every requirement at 0.92, above the default threshold.
#[must_use]
pub fn confident_parser() -> Arc<dyn BrdParser> {
    Arc::new(ScriptedParser::with_confidences(&[0.92]))
}

/// Start `run_id` under `home` against `mock`.
///
/// # Errors
///
/// As [`Orchestrator::start`].
pub fn start_run(
    config: &Config,
    home: &Utf8Path,
    run_id: &str,
    brd: &str,
    mock: &MockToolServer,
    parser: Arc<dyn BrdParser>,
) -> Result<Orchestrator, BrdflowError> {
    let platform = mock.platform();
    let gateway = mock_gateway(platform, mock, config);
    Orchestrator::start(config.clone(), home, run_id, brd, gateway, parser, false)
}

/// Reopen `run_id` against `mock`, as a fresh process would.
///
/// # Errors
///
/// As [`Orchestrator::open`].
pub fn open_run(
    config: &Config,
    home: &Utf8Path,
    run_id: &str,
    mock: &MockToolServer,
    parser: Arc<dyn BrdParser>,
) -> Result<Orchestrator, BrdflowError> {
    Orchestrator::open(
        config.clone(),
        home,
        run_id,
        false,
        |platform| Ok(mock_gateway(platform, mock, config)),
        parser,
    )
}
