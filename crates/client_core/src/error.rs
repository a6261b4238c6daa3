use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("daemon connection unavailable ({state})")]
    ConnectionUnavailable { state: SessionState },
    #[error("outbound buffer full ({capacity} frames waiting on the socket)")]
    OutboundFull { capacity: usize },
    #[error("daemon transport closed: {0}")]
    TransportClosed(String),
    #[error("invalid daemon url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid status root '{root}': {reason}")]
    InvalidStatusRoot { root: String, reason: String },
    #[error("connection manager already started")]
    AlreadyStarted,
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}
