//! JSON-RPC over HTTP POST

use async_trait::async_trait;
use serde_json::Value;

use brdflow_utils::error::GatewayError;

use crate::gateway::ToolTransport;
use crate::operation::Operation;
use crate::protocol::{Request, Response, normalize_response};
use crate::result::{ToolOutcome, codes};

pub struct HttpToolTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpToolTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ToolTransport for HttpToolTransport {
    async fn call(
        &self,
        operation: Operation,
        arguments: &Value,
        tool_call_id: u64,
    ) -> Result<ToolOutcome, GatewayError> {
        let request = Request::tool_call(tool_call_id, operation.name(), arguments);

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Tool-Call-Id", tool_call_id.to_string())
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("POST {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(ToolOutcome::error(
                codes::from_http_status(status.as_u16()),
                format!("HTTP {status}: {body}"),
            ));
        }

        let rpc: Response = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(format!("invalid JSON-RPC body: {e}")))?;
        Ok(normalize_response(rpc))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
