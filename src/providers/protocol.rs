//! JSON-RPC 2.0 framing for tool providers
//!
//! Providers speak newline-delimited JSON-RPC over stdio using the MCP method
//! names (`initialize`, `tools/list`, `tools/call`). This module only builds and
//! classifies messages; it never touches the channel.

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_LIST: &str = "tools/list";
pub const METHOD_CALL: &str = "tools/call";
pub const METHOD_PING: &str = "ping";

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn call(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    /// A request without an id; no reply is expected.
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.to_string(),
            params,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[allow(dead_code)]
    pub data: Option<Value>,
}

/// Server-initiated notifications carry a method and no id.
pub fn is_notification(message: &Value) -> bool {
    is_server_message(message) && message.get("id").map_or(true, Value::is_null)
}

/// Anything carrying a method was initiated by the server, with or without an id.
pub fn is_server_message(message: &Value) -> bool {
    message.get("method").is_some()
}

/// Numeric id of a reply, if it has one.
pub fn response_id(message: &Value) -> Option<u64> {
    message.get("id").and_then(Value::as_u64)
}

/// The answer owed to a server-initiated request. `ping` gets an empty
/// result; any other method is refused. Notifications get nothing.
pub fn server_request_reply(message: &Value) -> Option<Value> {
    if is_notification(message) {
        return None;
    }
    let id = message.get("id")?.clone();
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Some(if method == METHOD_PING {
        json!({ "jsonrpc": "2.0", "id": id, "result": {} })
    } else {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("Method not found: {}", method) }
        })
    })
}

/// Classify a reply to request `expected_id`.
///
/// Error member → `ProviderError`; wrong id, missing both members, or an
/// unreadable envelope → `ProtocolError`.
pub fn decode_response(message: Value, expected_id: u64) -> Result<Value> {
    let response: JsonRpcResponse = serde_json::from_value(message).map_err(|e| {
        OrchestrationError::ProtocolError(format!("Malformed JSON-RPC response: {}", e))
    })?;

    if response.id != Some(expected_id) {
        return Err(OrchestrationError::ProtocolError(format!(
            "Response id {:?} does not match request id {}",
            response.id, expected_id
        )));
    }

    if let Some(error) = response.error {
        return Err(OrchestrationError::ProviderError(format!(
            "[{}] {}",
            error.code, error.message
        )));
    }

    response.result.ok_or_else(|| {
        OrchestrationError::ProtocolError("Response has neither result nor error".to_string())
    })
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

pub fn call_params(operation: &str, arguments: &Value) -> Value {
    json!({
        "name": operation,
        "arguments": arguments,
    })
}

/// Decode a `tools/call` result.
///
/// `{ content: [{ type: "text", text }], isError }` is unwrapped: text that
/// parses as JSON becomes that JSON, otherwise the joined text. Any other
/// object is returned as-is.
pub fn decode_call_result(result: Value) -> Result<Value> {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let content = match result.get("content") {
        None => {
            if is_error {
                return Err(OrchestrationError::ProviderError(
                    "Operation failed without details".to_string(),
                ));
            }
            return Ok(result);
        }
        Some(content) => content.as_array().ok_or_else(|| {
            OrchestrationError::ProtocolError("'content' is not an array".to_string())
        })?,
    };

    let text = content
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");

    if is_error {
        let detail = if text.is_empty() {
            "Operation failed without details".to_string()
        } else {
            text
        };
        return Err(OrchestrationError::ProviderError(detail));
    }

    if text.is_empty() {
        return Ok(Value::Null);
    }

    Ok(serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text)))
}
