//! JSON-RPC 2.0 envelope and MCP method handling shared by all channels.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::supervisor::bus::{BusError, ERR_INVALID_PARAMS, ERR_INVALID_PAYLOAD, ERR_METHOD_NOT_FOUND};

use super::state::CommsState;

pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const ERR_PARSE: i32 = -32700;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

impl From<(Value, BusError)> for JsonRpcResponse {
    fn from((id, e): (Value, BusError)) -> Self {
        Self::err(id, e.code, e.message)
    }
}

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Handle one raw message body. `None` means no reply is due (notification).
pub async fn handle_bytes(state: &CommsState, channel_id: &str, body: &[u8]) -> Option<JsonRpcResponse> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return Some(JsonRpcResponse::err(Value::Null, ERR_PARSE, format!("Parse error: {e}"))),
    };
    if value.is_array() {
        return Some(JsonRpcResponse::err(
            Value::Null,
            ERR_INVALID_PAYLOAD,
            "Batch requests are not supported",
        ));
    }
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(request) => handle(state, channel_id, request).await,
        Err(e) => Some(JsonRpcResponse::err(id, ERR_INVALID_PAYLOAD, format!("Invalid request: {e}"))),
    }
}

/// Dispatch one decoded request.
pub async fn handle(state: &CommsState, channel_id: &str, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let JsonRpcRequest {
        jsonrpc,
        id,
        method,
        params,
    } = request;

    let Some(id) = id else {
        debug!(%method, "notification received");
        state.notify(&method, params);
        return None;
    };
    if jsonrpc != "2.0" {
        return Some(JsonRpcResponse::err(id, ERR_INVALID_PAYLOAD, "jsonrpc must be \"2.0\""));
    }
    if method.starts_with("notifications/") {
        state.notify(&method, params);
        return None;
    }

    debug!(%method, "rpc request");
    let response = match method.as_str() {
        "initialize" => {
            info!(%channel_id, "client session started");
            let requested = params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(Value::as_str)
                .unwrap_or(PROTOCOL_VERSION);
            JsonRpcResponse::ok(
                id,
                json!({
                    "protocolVersion": requested,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": {
                        "name": state.info().name,
                        "version": state.info().version,
                    },
                }),
            )
        }
        "ping" => JsonRpcResponse::ok(id, json!({})),
        "tools/list" => match state.list_tools().await {
            Ok(result) => JsonRpcResponse::ok(id, result),
            Err(e) => (id, e).into(),
        },
        "tools/call" => {
            let params = params.unwrap_or(Value::Null);
            match serde_json::from_value::<ToolCallParams>(params) {
                Err(e) => JsonRpcResponse::err(id, ERR_INVALID_PARAMS, format!("Invalid params: {e}")),
                Ok(p) => match state.call_tool(p.name, p.arguments).await {
                    Ok(result) => JsonRpcResponse::ok(id, result),
                    Err(e) => {
                        if e.code != ERR_INVALID_PARAMS {
                            warn!(code = e.code, "tool call failed: {}", e.message);
                        }
                        (id, e).into()
                    }
                },
            }
        }
        other => JsonRpcResponse::err(id, ERR_METHOD_NOT_FOUND, format!("Method not found: {other}")),
    };
    Some(response)
}
