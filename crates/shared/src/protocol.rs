use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, RpcError};

pub const JSONRPC_VERSION: &str = "2.0";

/// Moonraker method used for raw gcode scripts.
pub const GCODE_SCRIPT_METHOD: &str = "printer.gcode.script";
pub const OBJECTS_SUBSCRIBE_METHOD: &str = "printer.objects.subscribe";
pub const STATUS_UPDATE_NOTIFICATION: &str = "notify_status_update";
pub const KLIPPY_READY_NOTIFICATION: &str = "notify_klippy_ready";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Command request: the script goes out as the opaque `script` argument.
    pub fn command(method: impl Into<String>, script: &str, id: u64) -> Self {
        let mut params = Map::new();
        params.insert("script".to_string(), Value::String(script.to_string()));
        Self::new(method, Value::Object(params), id)
    }

    pub fn subscribe(objects: Map<String, Value>, id: u64) -> Self {
        let mut params = Map::new();
        params.insert("objects".to_string(), Value::Object(objects));
        Self::new(OBJECTS_SUBSCRIBE_METHOD, Value::Object(params), id)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Notification { method: String, params: Value },
    Reply { id: u64, outcome: ReplyOutcome },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Result(Value),
    Error(RpcError),
}

/// Classifies one inbound text frame.
///
/// A frame with a non-null `id` and a `result` or `error` member is a reply;
/// a frame with a `method` and no `id` is a notification. Everything else is
/// malformed, including server-initiated requests (method plus id), which the
/// daemon does not send to display clients.
pub fn decode_inbound(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| ProtocolError::malformed(format!("invalid json: {err}")))?;
    let Value::Object(mut frame) = value else {
        return Err(ProtocolError::malformed("frame is not a json object"));
    };

    let id = match frame.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(parse_id(&raw)?),
    };
    let method = match frame.remove("method") {
        None | Some(Value::Null) => None,
        Some(Value::String(method)) => Some(method),
        Some(other) => {
            return Err(ProtocolError::malformed(format!(
                "method must be a string, got {other}"
            )))
        }
    };

    match (id, method) {
        (Some(id), None) => {
            if let Some(error) = frame.remove("error").filter(|e| !e.is_null()) {
                let error: RpcError = serde_json::from_value(error).map_err(|err| {
                    ProtocolError::malformed(format!("invalid error object: {err}"))
                })?;
                Ok(InboundMessage::Reply {
                    id,
                    outcome: ReplyOutcome::Error(error),
                })
            } else if let Some(result) = frame.remove("result") {
                Ok(InboundMessage::Reply {
                    id,
                    outcome: ReplyOutcome::Result(result),
                })
            } else {
                Err(ProtocolError::malformed(format!(
                    "reply {id} has neither result nor error"
                )))
            }
        }
        (None, Some(method)) => Ok(InboundMessage::Notification {
            method,
            params: frame.remove("params").unwrap_or(Value::Null),
        }),
        (Some(id), Some(method)) => Err(ProtocolError::malformed(format!(
            "unexpected request '{method}' with id {id}"
        ))),
        (None, None) => Err(ProtocolError::malformed("frame has neither method nor id")),
    }
}

fn parse_id(raw: &Value) -> Result<u64, ProtocolError> {
    match raw {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ProtocolError::malformed(format!("reply id {n} is not unsigned"))),
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| ProtocolError::malformed(format!("reply id '{s}' is not numeric"))),
        other => Err(ProtocolError::malformed(format!(
            "reply id has unsupported type: {other}"
        ))),
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
