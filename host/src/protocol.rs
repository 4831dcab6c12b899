//! JSON-RPC message shapes and the server handshake payloads.

use serde::Serialize;

const JSONRPC_VERSION: &str = "2.0";

/// Serializes the fixed protocol version tag; the structs below carry it as
/// a unit field so it cannot be constructed with any other value.
fn version_tag<S: serde::Serializer>(_: &(), serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(JSONRPC_VERSION)
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Request {
    #[serde(serialize_with = "version_tag")]
    jsonrpc: (),
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: (),
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Notification {
    #[serde(serialize_with = "version_tag")]
    jsonrpc: (),
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: (),
            method,
            params,
        }
    }
}

/// Classified incoming frame from the server.
#[derive(Debug)]
pub(crate) enum Incoming {
    /// Reply to one of our requests.
    Response { id: u64, body: serde_json::Value },
    /// Server-initiated request; must be answered.
    ServerRequest {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    /// Fire-and-forget notification.
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

/// Classify a raw frame, or `None` when it fits no JSON-RPC shape.
pub(crate) fn classify(frame: &serde_json::Value) -> Option<Incoming> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_reply) {
        (Some(id), None, true) => Some(Incoming::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(Incoming::ServerRequest {
            id: id.clone(),
            method,
            params: frame.get("params").cloned(),
        }),
        (None, Some(method), _) => Some(Incoming::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// Build a JSON-RPC result reply to a server request.
pub(crate) fn reply_ok(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Build a JSON-RPC error reply to a server request.
pub(crate) fn reply_err(id: &serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

pub(crate) fn initialize_params() -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": "sherpa-host",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "rootUri": null,
        "capabilities": {},
    })
}

/// Extract the text of a `window/logMessage` notification.
pub(crate) fn log_message_text(params: Option<&serde_json::Value>) -> Option<String> {
    params?
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
}
