//! JSON-RPC protocol representations and error mapping
//!
//! Classifies decoded frame bodies into requests and notifications, and maps
//! internal `AppError`s onto JSON-RPC error objects.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::AppError;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const NOT_INITIALIZED: i64 = -32002;
pub const TOOL_NOT_FOUND: i64 = -32004;
pub const TOOL_EXECUTION_FAILED: i64 = -32005;

/// A routable JSON-RPC message. `id` is `Some` whenever the property is present,
/// including `Some(Value::Null)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

impl Incoming {
    /// Returns `None` for anything that is not a `"2.0"` object carrying a string `method`.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut object) = value else {
            return None;
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return None;
        }

        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            _ => return None,
        };

        Some(Self {
            id: object.remove("id"),
            method,
            params: object.remove("params"),
        })
    }

    pub fn is_request(&self) -> bool {
        self.id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            METHOD_NOT_FOUND,
            "Method not found",
            Some(json!({ "method": method })),
        )
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params", Some(Value::String(detail.into())))
    }

    pub fn not_initialized() -> Self {
        Self::new(NOT_INITIALIZED, "Server not initialized", None)
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(TOOL_NOT_FOUND, "Tool not found", Some(json!({ "name": name })))
    }

    pub fn tool_execution_failed(message: impl Into<String>) -> Self {
        Self::new(
            TOOL_EXECUTION_FAILED,
            "Tool execution failed",
            Some(Value::String(message.into())),
        )
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, "Internal error", Some(Value::String(detail.into())))
    }
}

/// Exactly one of `result` and `error` is set; use [`JsonRpcResponse::ok`] or [`JsonRpcResponse::err`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_outcome(id: Value, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => Self::ok(id, result),
            Err(error) => Self::err(id, error),
        }
    }
}

pub fn app_error_to_rpc(err: AppError) -> RpcError {
    match err {
        AppError::BadRequest { code, message } | AppError::NotFound { code, message } => {
            RpcError::new(
                INVALID_PARAMS,
                "Invalid params",
                Some(json!({
                    "code": code,
                    "message": message,
                })),
            )
        }
        AppError::Internal { code, message } => {
            tracing::error!(code, error = %message, "request failed with internal error");
            RpcError::new(INTERNAL_ERROR, "Internal error", None)
        }
    }
}

/// Reads `params` as an object, treating absent or `null` params as empty.
pub fn params_object(params: Option<&Value>) -> Option<Map<String, Value>> {
    match params {
        None | Some(Value::Null) => Some(Map::new()),
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_with_null_id_is_still_a_request() {
        let incoming = Incoming::from_value(json!({
            "jsonrpc": "2.0",
            "id": null,
            "method": "ping"
        }))
        .expect("valid message");

        assert!(incoming.is_request());
        assert_eq!(incoming.id, Some(Value::Null));
    }

    #[test]
    fn message_without_id_is_a_notification() {
        let incoming = Incoming::from_value(json!({
            "jsonrpc": "2.0",
            "method": "initialized",
            "params": {}
        }))
        .expect("valid message");

        assert!(!incoming.is_request());
        assert_eq!(incoming.params, Some(json!({})));
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert!(Incoming::from_value(json!({ "jsonrpc": "2.0", "id": 1 })).is_none());
        assert!(Incoming::from_value(json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" })).is_none());
        assert!(Incoming::from_value(json!({ "id": 1, "method": "ping" })).is_none());
        assert!(Incoming::from_value(json!({ "jsonrpc": "2.0", "method": 7 })).is_none());
        assert!(Incoming::from_value(json!(["ping"])).is_none());
    }

    #[test]
    fn responses_serialize_exactly_one_outcome() {
        let ok = serde_json::to_value(JsonRpcResponse::ok(json!(0), json!({ "ok": true })))
            .expect("serialize");
        assert_eq!(ok, json!({ "jsonrpc": "2.0", "id": 0, "result": { "ok": true } }));

        let err = serde_json::to_value(JsonRpcResponse::err(
            Value::Null,
            RpcError::not_initialized(),
        ))
        .expect("serialize");
        assert_eq!(
            err,
            json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": NOT_INITIALIZED, "message": "Server not initialized" }
            })
        );
    }

    #[test]
    fn not_found_maps_to_invalid_params_with_details() {
        let rpc = app_error_to_rpc(AppError::case_not_found("case_x"));
        assert_eq!(rpc.code, INVALID_PARAMS);
        assert_eq!(
            rpc.data,
            Some(json!({ "code": "case_not_found", "message": "Case case_x not found" }))
        );
    }

    #[test]
    fn internal_errors_hide_details() {
        let rpc = app_error_to_rpc(AppError::internal("disk on fire"));
        assert_eq!(rpc.code, INTERNAL_ERROR);
        assert_eq!(rpc.data, None);
    }
}
