//! JSON-RPC 2.0 envelope types (spec §6: "line-delimited JSON-RPC 2.0 over
//! standard input/output"). Grounded on the teacher's `ClientRequest`/
//! `ServerResponse` tagged-enum shape, restructured from the teacher's
//! bespoke websocket protocol to the standard JSON-RPC request/response/
//! error fields since that's the wire format this transport actually speaks.

use serde::{Deserialize, Serialize};

/// One incoming line: `{"jsonrpc":"2.0","id":..,"method":"...","params":{...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One outgoing line: either a `result` or an `error`, never both.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn ok(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<serde_json::Value>, error: ResponseError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error object. Codes follow the JSON-RPC 2.0 reserved ranges for
/// protocol-level failures (parse/invalid-request/method-not-found/invalid-
/// params) and a server-defined range for engine-level failures, one per
/// [`codegraph_core::EngineError`] kind (spec §7's error table).
#[derive(Debug, Clone, Serialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// Base of the engine error range; offset by [`codegraph_core::EngineError::kind`]'s
/// position below to get a stable per-kind code.
const ENGINE_ERROR_BASE: i64 = -32000;

impl ResponseError {
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: PARSE_ERROR,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_REQUEST,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("unknown tool: {method}"),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
            data: None,
        }
    }

    /// Maps an [`codegraph_core::EngineError`] onto a JSON-RPC error object,
    /// carrying `retryAfterMs` in `data` when the error kind has one (spec
    /// §7: "every error carries ... a `retryAfterMs` hint").
    pub fn from_engine_error(err: &codegraph_core::EngineError) -> Self {
        let code = ENGINE_ERROR_BASE - engine_error_offset(err);
        let data = err.retry_after_ms().map(|ms| serde_json::json!({"retryAfterMs": ms}));
        Self {
            code,
            message: err.to_string(),
            data,
        }
    }
}

fn engine_error_offset(err: &codegraph_core::EngineError) -> i64 {
    match err.kind() {
        "invalid_input" => 1,
        "backpressure" => 2,
        "parse_error" => 3,
        "storage_error" => 4,
        "resource_degraded" => 5,
        "semantic_provider" => 6,
        "invariant_violation" => 7,
        "fatal_startup" => 8,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegraph_core::{BusyReason, EngineError};
    use std::time::Duration;

    #[test]
    fn busy_error_carries_retry_after_in_data() {
        let err = EngineError::busy(BusyReason::QueueFull, Duration::from_millis(500));
        let resp = ResponseError::from_engine_error(&err);
        assert_eq!(resp.data.unwrap()["retryAfterMs"], 500);
    }

    #[test]
    fn request_deserializes_without_params() {
        let req: Request = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert_eq!(req.method, "ping");
        assert!(req.params.is_null());
    }
}
