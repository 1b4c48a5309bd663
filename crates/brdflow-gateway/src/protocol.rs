//! JSON-RPC 2.0 framing spoken by the tracker tool servers

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::result::{ToolOutcome, codes};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    #[must_use]
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    /// `initialize` handshake sent once per connection.
    #[must_use]
    pub fn initialize(id: u64) -> Self {
        Self::new(
            id,
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "brdflow", "version": env!("CARGO_PKG_VERSION")},
            }),
        )
    }

    #[must_use]
    pub fn tool_call(id: u64, name: &str, arguments: &Value) -> Self {
        Self::new(id, "tools/call", json!({"name": name, "arguments": arguments}))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl ToolCallResult {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolResultContent::Text { text } => Some(text.as_str()),
                ToolResultContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Classify a tool server's error text into a result code.
#[must_use]
pub fn classify_error_text(text: &str) -> i32 {
    let lower = text.to_lowercase();
    if lower.contains("not found") || lower.contains("does not exist") {
        codes::NOT_FOUND
    } else if lower.contains("unauthorized")
        || lower.contains("not authenticated")
        || lower.contains("token expired")
    {
        codes::UNAUTHORIZED
    } else if lower.contains("already exists") {
        codes::CONFLICT
    } else if lower.contains("forbidden") || lower.contains("permission") {
        codes::FORBIDDEN
    } else if lower.contains("rate limit") || lower.contains("too many requests") {
        codes::RATE_LIMITED
    } else if lower.contains("timed out") || lower.contains("timeout") {
        codes::TIMEOUT
    } else if lower.contains("unsupported") || lower.contains("unknown tool") {
        codes::UNSUPPORTED_OPERATION
    } else if lower.contains("invalid") || lower.contains("required") {
        codes::BAD_REQUEST
    } else {
        codes::REJECTED
    }
}

/// Normalize a JSON-RPC response to a `tools/call` request.
#[must_use]
pub fn normalize_response(response: Response) -> ToolOutcome {
    if let Some(err) = response.error {
        // -32601 method not found, -32602 invalid params
        let code = match err.code {
            -32601 => codes::UNSUPPORTED_OPERATION,
            -32602 => codes::BAD_REQUEST,
            _ => classify_error_text(&err.message),
        };
        return ToolOutcome::error(code, err.message);
    }

    let Some(result) = response.result else {
        return ToolOutcome::error(codes::PROTOCOL, "response carried neither result nor error");
    };

    let call: ToolCallResult = match serde_json::from_value(result) {
        Ok(call) => call,
        Err(e) => return ToolOutcome::error(codes::PROTOCOL, format!("malformed tool result: {e}")),
    };

    let text = call.text();
    if call.is_error {
        return ToolOutcome::error(classify_error_text(&text), text);
    }

    let data = match call.structured_content {
        Some(data) => data,
        None if text.trim().is_empty() => Value::Null,
        // Tool servers often return JSON as the text block
        None => serde_json::from_str(&text).unwrap_or(Value::String(text)),
    };
    ToolOutcome::ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(result: Value) -> Response {
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": result})).unwrap()
    }

    #[test]
    fn test_structured_content_preferred() {
        let outcome = normalize_response(response(json!({
            "content": [{"type": "text", "text": "created"}],
            "structuredContent": {"key": "PROJ-7"},
            "isError": false
        })));
        assert_eq!(outcome.code, codes::OK);
        assert_eq!(outcome.data["key"], "PROJ-7");
    }

    #[test]
    fn test_text_json_is_parsed() {
        let outcome = normalize_response(response(json!({
            "content": [{"type": "text", "text": "{\"id\": 1001}"}]
        })));
        assert_eq!(outcome.data["id"], 1001);
    }

    #[test]
    fn test_is_error_text_classified() {
        let cases = [
            ("Work item 12 not found", codes::NOT_FOUND),
            ("Unauthorized: token expired", codes::UNAUTHORIZED),
            ("Rate limit exceeded, retry later", codes::RATE_LIMITED),
            ("Project SHOP already exists", codes::CONFLICT),
            ("Project name collides with deleted project", codes::REJECTED),
        ];
        for (text, code) in cases {
            let outcome = normalize_response(response(json!({
                "content": [{"type": "text", "text": text}],
                "isError": true
            })));
            assert_eq!(outcome.code, code, "{text}");
            assert_eq!(outcome.error.as_deref(), Some(text));
        }
    }

    #[test]
    fn test_rpc_error_codes() {
        let resp: Response = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 3,
            "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap();
        assert_eq!(normalize_response(resp).code, codes::UNSUPPORTED_OPERATION);
    }

    #[test]
    fn test_tool_call_request_shape() {
        let req = Request::tool_call(5, "create_issue", &json!({"project": "P"}));
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["method"], "tools/call");
        assert_eq!(wire["params"]["name"], "create_issue");
        assert_eq!(wire["params"]["arguments"]["project"], "P");
    }
}
