//! Line-delimited JSON-RPC over a child process
//!
//! The tool server is spawned lazily on the first call with `MCP_SERVER` set to
//! the platform, then `initialize` is exchanged once. A dead child is respawned
//! on the next call.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use brdflow_utils::error::GatewayError;
use brdflow_utils::types::Platform;

use crate::gateway::ToolTransport;
use crate::operation::Operation;
use crate::protocol::{Request, Response, normalize_response};
use crate::result::ToolOutcome;

struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl Connection {
    async fn send(&mut self, request: &Request) -> Result<(), GatewayError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| GatewayError::Protocol(format!("failed to encode request: {e}")))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| GatewayError::Transport(format!("write to tool server failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| GatewayError::Transport(format!("flush to tool server failed: {e}")))
    }

    /// Read lines until the response carrying `id`; notifications are skipped.
    async fn receive(&mut self, id: u64) -> Result<Response, GatewayError> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| GatewayError::Transport(format!("read from tool server failed: {e}")))?
                .ok_or_else(|| GatewayError::Transport("tool server closed stdout".to_string()))?;

            if line.trim().is_empty() {
                continue;
            }
            let Ok(response) = serde_json::from_str::<Response>(&line) else {
                tracing::debug!(line = %line, "Skipping non-response line from tool server");
                continue;
            };
            if response.id == Some(id) {
                return Ok(response);
            }
        }
    }
}

pub struct StdioToolTransport {
    program: String,
    args: Vec<String>,
    platform: Platform,
    conn: Mutex<Option<Connection>>,
}

impl StdioToolTransport {
    /// `command` is split on whitespace into program and arguments.
    pub fn new(command: &str, platform: Platform) -> Result<Self, GatewayError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            GatewayError::Transport("gateway.command is empty".to_string())
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
            platform,
            conn: Mutex::new(None),
        })
    }

    async fn connect(&self) -> Result<Connection, GatewayError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("MCP_SERVER", self.platform.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GatewayError::Transport(format!("failed to spawn tool server '{}': {e}", self.program))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::Transport("tool server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Transport("tool server stdout unavailable".to_string()))?;

        let mut conn = Connection {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        conn.send(&Request::initialize(0)).await?;
        let response = conn.receive(0).await?;
        if let Some(err) = response.error {
            return Err(GatewayError::Protocol(format!("initialize rejected: {}", err.message)));
        }
        let initialized = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        });
        let mut line = initialized.to_string();
        line.push('\n');
        conn.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| GatewayError::Transport(format!("write to tool server failed: {e}")))?;

        tracing::debug!(program = %self.program, platform = %self.platform, "Tool server connected");
        Ok(conn)
    }
}

#[async_trait]
impl ToolTransport for StdioToolTransport {
    async fn call(
        &self,
        operation: Operation,
        arguments: &Value,
        tool_call_id: u64,
    ) -> Result<ToolOutcome, GatewayError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(GatewayError::Transport("tool server not connected".to_string()));
        };

        let request = Request::tool_call(tool_call_id, operation.name(), arguments);
        let result = match conn.send(&request).await {
            Ok(()) => conn.receive(tool_call_id).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => Ok(normalize_response(response)),
            Err(e) => {
                // Drop the connection so the next attempt respawns the server
                if let Some(mut dead) = guard.take() {
                    let _ = dead.child.start_kill();
                }
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_split() {
        let t = StdioToolTransport::new("node servers/index.js --quiet", Platform::Ado).unwrap();
        assert_eq!(t.program, "node");
        assert_eq!(t.args, vec!["servers/index.js", "--quiet"]);
        assert!(StdioToolTransport::new("   ", Platform::Ado).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_program_is_transport_error() {
        let t = StdioToolTransport::new("/nonexistent/brdflow-tool-server", Platform::Jira).unwrap();
        let err = t
            .call(Operation::Authenticate, &serde_json::json!({}), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
