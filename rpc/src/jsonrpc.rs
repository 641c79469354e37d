//! The JSON-RPC 2.0 request/response envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// A single JSON-RPC call. `id` is echoed back verbatim so clients can
/// match responses to requests; Bitcoin Core RPC clients often send it as
/// a bare integer rather than a string, so it's kept as an opaque `Value`
/// rather than parsed into a concrete type.
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A JSON-RPC response: exactly one of `result` or `error` is present.
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: RpcError) -> Self {
        Response {
            id,
            result: None,
            error: Some(ErrorObject {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }
}
