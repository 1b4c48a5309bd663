//! HTTP parsing model client
//!
//! POSTs `{text, instruction?}` to the configured endpoint and expects
//! `{title?, confidence, requirements: [{title, description?, kind, confidence?}]}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use brdflow_utils::error::ParseError;
use brdflow_utils::types::RequirementKind;

use crate::types::{BrdParser, ParseRequest, ParseResult, Requirement};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct ParseBody<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instruction: Option<&'a str>,
}

#[derive(Deserialize)]
struct WireRequirement {
    title: String,
    #[serde(default)]
    description: String,
    kind: RequirementKind,
    confidence: Option<f64>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    title: Option<String>,
    confidence: f64,
    requirements: Vec<WireRequirement>,
}

pub struct RemoteParser {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteParser {
    /// # Errors
    ///
    /// Returns [`ParseError::Backend`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ParseError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ParseError::Backend(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl BrdParser for RemoteParser {
    async fn parse(&self, request: &ParseRequest) -> Result<ParseResult, ParseError> {
        if request.text.trim().is_empty() {
            return Err(ParseError::EmptyDocument);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&ParseBody {
                text: &request.text,
                instruction: request.instruction.as_deref(),
            })
            .send()
            .await
            .map_err(|e| ParseError::Backend(format!("POST {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ParseError::Backend(format!("parser returned HTTP {status}")));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ParseError::Malformed(e.to_string()))?;

        let semantic_score = wire.confidence;
        Ok(ParseResult {
            title: wire.title,
            semantic_score,
            requirements: wire
                .requirements
                .into_iter()
                .map(|r| {
                    Requirement::new(
                        r.title.trim(),
                        r.description.trim(),
                        r.kind,
                        r.confidence.unwrap_or(semantic_score),
                    )
                })
                .collect(),
        })
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
