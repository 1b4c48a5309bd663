use serde::{Deserialize, Serialize};
use serde_json::Value;

use brdflow_utils::error::GatewayError;
use brdflow_utils::types::ErrorClass;

use crate::operation::Operation;

/// Normalized result codes.
///
/// | Range | Class |
/// |-------|-------|
/// | 0 | success |
/// | 100–199 | transient |
/// | 200–399 | permanent |
/// | 400+ | client |
pub mod codes {
    pub const OK: i32 = 0;

    pub const TIMEOUT: i32 = 100;
    pub const NETWORK: i32 = 101;
    pub const UPSTREAM_UNAVAILABLE: i32 = 102;
    pub const RATE_LIMITED: i32 = 103;
    pub const NOT_READY: i32 = 104;

    pub const UNSUPPORTED_OPERATION: i32 = 200;
    pub const REJECTED: i32 = 201;
    pub const PROTOCOL: i32 = 202;

    pub const BAD_REQUEST: i32 = 400;
    pub const UNAUTHORIZED: i32 = 401;
    pub const FORBIDDEN: i32 = 403;
    pub const NOT_FOUND: i32 = 404;
    pub const CONFLICT: i32 = 409;

    /// Map an HTTP status from a tool server response to a result code.
    #[must_use]
    pub fn from_http_status(status: u16) -> i32 {
        match status {
            200..=299 => OK,
            401 => UNAUTHORIZED,
            403 => FORBIDDEN,
            404 => NOT_FOUND,
            409 => CONFLICT,
            408 => TIMEOUT,
            429 => RATE_LIMITED,
            400..=499 => BAD_REQUEST,
            _ => UPSTREAM_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// Outcome of one transport round trip, before retry bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub code: i32,
    pub data: Value,
    pub error: Option<String>,
}

impl ToolOutcome {
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            code: codes::OK,
            data,
            error: None,
        }
    }

    #[must_use]
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            data: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Normalized result of a gateway invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub operation: Operation,
    pub status: ToolStatus,
    pub code: i32,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_call_id: u64,
    /// Attempts made, including the first.
    pub attempts: u32,
    pub latency_ms: u64,
}

impl ToolResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ToolStatus::Ok
    }

    #[must_use]
    pub fn class(&self) -> Option<ErrorClass> {
        ErrorClass::from_code(self.code)
    }

    /// Convert into the payload, or the classified error.
    pub fn into_data(self) -> Result<Value, GatewayError> {
        if self.is_ok() {
            Ok(self.data)
        } else {
            Err(GatewayError::from_code(
                self.operation.name(),
                self.code,
                self.error.unwrap_or_else(|| format!("code {}", self.code)),
                self.attempts,
            ))
        }
    }
}
