use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("delta must be a json object, got {kind}")]
    NotAnObject { kind: &'static str },
    #[error("delta key '{key}' is not a valid state path: {reason}")]
    InvalidPath { key: String, reason: String },
    #[error("delta would replace the state root with a non-object value")]
    RootNotObject,
}

/// Why a consumer did not finish a dispatch cycle cleanly.
#[derive(Debug, Error)]
pub enum ConsumerFailure {
    #[error("consumer '{consumer}' returned an error: {source}")]
    Returned {
        consumer: String,
        source: anyhow::Error,
    },
    #[error("consumer '{consumer}' panicked: {message}")]
    Panicked { consumer: String, message: String },
}

pub(crate) fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
