//! Tool gateway for brdflow
//!
//! Every remote tracker operation goes through [`ToolGateway`], which owns
//! pacing, timeouts, the retry policy and the per-run call trace. Transports
//! speak JSON-RPC 2.0 to an ADO or Jira tool server over stdio or HTTP.

mod gateway;
mod operation;
mod protocol;
mod result;
mod retry;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use gateway::{GatewaySettings, ToolGateway, ToolTransport, TraceEntry};
pub use operation::Operation;
pub use protocol::{PROTOCOL_VERSION, Request, Response, RpcError, normalize_response};
pub use result::{ToolOutcome, ToolResult, ToolStatus, codes};
pub use retry::{RetryPolicy, paced_delay};

use brdflow_config::{Config, TransportKind};
use brdflow_redaction::SecretRedactor;
use brdflow_utils::error::GatewayError;
use brdflow_utils::types::Platform;

use transport::{HttpToolTransport, StdioToolTransport};

/// Build a gateway for `platform` from the effective configuration.
///
/// # Errors
///
/// Returns [`GatewayError::Transport`] when the selected transport is missing
/// its command or endpoint, or when the redaction patterns fail to compile.
pub fn from_config(config: &Config, platform: Platform) -> Result<ToolGateway, GatewayError> {
    let transport: Box<dyn ToolTransport> = match config.gateway.transport {
        TransportKind::Stdio => {
            let command = config.gateway.command.as_deref().ok_or_else(|| {
                GatewayError::Transport(
                    "gateway.command must name the tool server for stdio transport".to_string(),
                )
            })?;
            Box::new(StdioToolTransport::new(command, platform)?)
        }
        TransportKind::Http => {
            let endpoint = match platform {
                Platform::Ado => config.gateway.ado_endpoint.as_deref(),
                Platform::Jira => config.gateway.jira_endpoint.as_deref(),
            }
            .ok_or_else(|| {
                GatewayError::Transport(format!("gateway.{platform}_endpoint is not set"))
            })?;
            Box::new(HttpToolTransport::new(endpoint)?)
        }
    };

    let redactor = SecretRedactor::from_config(config)
        .map_err(|e| GatewayError::Transport(format!("invalid secret pattern: {e}")))?;

    Ok(ToolGateway::new(
        platform,
        transport,
        GatewaySettings::from_config(&config.gateway),
        redactor,
    ))
}
