//! Stub tracker tool server for development testing
//!
//! Speaks the JSON-RPC 2.0 stdio protocol of the ADO and Jira tool servers
//! and answers from an in-memory tracker, so the CLI can be exercised end to
//! end without a real Azure DevOps or Jira instance. `MCP_SERVER` selects the
//! platform, as it does for the real servers. State lives only as long as the
//! process.

use clap::{Arg, Command};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use brdflow_gateway::testing::MockToolServer;
use brdflow_gateway::{Operation, Request, ToolTransport, codes};
use brdflow_utils::types::Platform;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("brdflow-tool-stub")
        .about("Stub ADO/Jira tool server for testing brdflow")
        .arg(
            Arg::new("organizations")
                .long("organizations")
                .value_name("NAMES")
                .help("Comma-separated ADO organizations")
                .default_value("Contoso"),
        )
        .arg(
            Arg::new("project")
                .long("project")
                .value_name("NAME:KEY")
                .help("Pre-existing project"),
        )
        .arg(
            Arg::new("fail-title")
                .long("fail-title")
                .value_name("TITLE")
                .help("create_issue for this title is rejected")
                .action(clap::ArgAction::Append),
        )
        .get_matches();

    let platform: Platform = std::env::var("MCP_SERVER")
        .unwrap_or_else(|_| "jira".to_string())
        .parse()?;

    let organizations: Vec<&str> = matches
        .get_one::<String>("organizations")
        .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let mut mock = MockToolServer::new(platform).with_organizations(&organizations);
    if let Some((name, key)) = matches.get_one::<String>("project").and_then(|p| p.split_once(':')) {
        mock = mock.with_project(name, key);
    }
    for title in matches.get_many::<String>("fail-title").into_iter().flatten() {
        mock.fail_create_titled(title, codes::REJECTED);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            // Notifications carry no id
            Err(_) => continue,
        };
        let response = handle(&mock, request).await;
        let mut out = response.to_string();
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn handle(mock: &MockToolServer, request: Request) -> Value {
    let id = request.id;
    match request.method.as_str() {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": brdflow_gateway::PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "brdflow-tool-stub", "version": env!("CARGO_PKG_VERSION")},
            },
        }),
        "tools/call" => {
            let name = request.params.get("name").and_then(Value::as_str).unwrap_or_default();
            let arguments = request.params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let Ok(operation) = name.parse::<Operation>() else {
                return rpc_error(id, -32601, &format!("unknown tool {name}"));
            };
            match mock.call(operation, &arguments, id).await {
                Ok(outcome) if outcome.code == codes::OK => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{"type": "text", "text": outcome.data.to_string()}],
                        "structuredContent": outcome.data,
                        "isError": false,
                    },
                }),
                Ok(outcome) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{"type": "text", "text": outcome.error.unwrap_or_default()}],
                        "isError": true,
                    },
                }),
                Err(e) => rpc_error(id, -32603, &e.to_string()),
            }
        }
        other => rpc_error(id, -32601, &format!("method {other} not found")),
    }
}

fn rpc_error(id: u64, code: i32, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}
