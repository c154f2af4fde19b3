//! JSON-RPC 2.0 framing for backend connections
//!
//! Backends are driven with raw `serde_json::Value` messages so that the
//! router never drops fields it does not understand. This module only knows
//! how to build outgoing messages and how to classify incoming ones.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision announced in the backend handshake
pub const PROTOCOL_VERSION: &str = "2025-06-18";

pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub fn request(id: u64, method: &str, params: Option<Value>) -> Value {
    let mut msg = json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "method": method });
    if let Some(params) = params {
        msg["params"] = params;
    }
    msg
}

pub fn notification(method: &str, params: Option<Value>) -> Value {
    let mut msg = json!({ "jsonrpc": JSONRPC_VERSION, "method": method });
    if let Some(params) = params {
        msg["params"] = params;
    }
    msg
}

pub fn result_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

pub fn error_response(id: Value, code: i32, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}

/// `notifications/cancelled` for a request the router gave up on
pub fn cancelled(request_id: u64, reason: &str) -> Value {
    notification(
        "notifications/cancelled",
        Some(json!({ "requestId": request_id, "reason": reason })),
    )
}

/// A classified incoming message
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        id: Value,
        outcome: Result<Value, JsonRpcError>,
    },
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// Why a message could not be classified
#[derive(Debug, Clone, PartialEq)]
pub struct Malformed {
    /// Present when the message carried an id we could attribute it to
    pub id: Option<Value>,
    pub reason: String,
}

impl Malformed {
    fn new(id: Option<Value>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

impl Incoming {
    pub fn classify(msg: Value) -> Result<Self, Malformed> {
        let Value::Object(mut obj) = msg else {
            return Err(Malformed::new(None, "message is not a JSON object"));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(Malformed::new(
                obj.get("id").cloned(),
                "missing or wrong jsonrpc version",
            ));
        }

        let id = obj.remove("id").filter(|id| !id.is_null());
        let method = obj.remove("method");
        let params = obj.remove("params");

        match (id, method) {
            (Some(id), Some(Value::String(method))) => Ok(Incoming::Request { id, method, params }),
            (None, Some(Value::String(method))) => Ok(Incoming::Notification { method, params }),
            (_, Some(_)) => Err(Malformed::new(None, "method is not a string")),
            (Some(id), None) => {
                let result = obj.remove("result");
                let error = obj.remove("error");
                match (result, error) {
                    (Some(result), None) => Ok(Incoming::Response {
                        id,
                        outcome: Ok(result),
                    }),
                    (None, Some(error)) => match serde_json::from_value::<JsonRpcError>(error) {
                        Ok(error) => Ok(Incoming::Response {
                            id,
                            outcome: Err(error),
                        }),
                        Err(e) => Err(Malformed::new(Some(id), format!("invalid error object: {}", e))),
                    },
                    (Some(_), Some(_)) => Err(Malformed::new(
                        Some(id),
                        "response has both result and error",
                    )),
                    (None, None) => Err(Malformed::new(
                        Some(id),
                        "response has neither result nor error",
                    )),
                }
            }
            (None, None) => Err(Malformed::new(None, "message has neither id nor method")),
        }
    }
}

/// Extract `params._meta.progressToken`
pub fn progress_token(params: &Value) -> Option<&Value> {
    params.get("_meta").and_then(|m| m.get("progressToken"))
}

/// Set `params._meta.progressToken`, creating `_meta` when needed
pub fn set_progress_token(params: &mut Value, token: Value) {
    if !params.is_object() {
        *params = json!({});
    }
    let meta = &mut params["_meta"];
    if !meta.is_object() {
        *meta = json!({});
    }
    meta["progressToken"] = token;
}
