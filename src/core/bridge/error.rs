use thiserror::Error;

use crate::core::realtime::RealtimeError;

/// Errors of a bridged session.
///
/// Only `Connection`, `UpstreamClosed` and `ClientClosed` end a session;
/// `Protocol` errors are logged and the offending event dropped.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Upstream connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Upstream session ended: {0}")]
    UpstreamClosed(String),

    #[error("Client link closed")]
    ClientClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RealtimeError> for BridgeError {
    fn from(err: RealtimeError) -> Self {
        BridgeError::Connection(err.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
