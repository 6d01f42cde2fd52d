use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a transport stopped delivering. Always recoverable by resync.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportFailure {
    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("undecodable payload: {message}")]
    Decode { message: String },

    #[error("transport closed")]
    Closed,
}

impl From<reqwest::Error> for TransportFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportFailure::Timeout { after_ms: 0 }
        } else if err.is_decode() {
            TransportFailure::Decode {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            TransportFailure::Http {
                status: status.as_u16(),
            }
        } else {
            TransportFailure::Connection {
                message: err.to_string(),
            }
        }
    }
}

impl From<redis::RedisError> for TransportFailure {
    fn from(err: redis::RedisError) -> Self {
        TransportFailure::Connection {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TransportFailure {
    fn from(err: serde_json::Error) -> Self {
        TransportFailure::Decode {
            message: err.to_string(),
        }
    }
}

/// Subscriber-side synchronization faults. None of these are fatal to a view;
/// each one ends in a snapshot-based resync.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncFault {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportFailure),

    #[error("sequence gap: expected {expected}, buffered up to {received}")]
    SequenceGap { expected: u64, received: u64 },

    #[error("backfill from sequence {requested} unavailable, oldest buffered is {oldest}")]
    BackfillUnavailable { requested: u64, oldest: u64 },

    #[error("subscriber lagged, {skipped} deltas skipped")]
    Lagged { skipped: u64 },
}

impl SyncFault {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncFault::Transport(_) => "transport_failure",
            SyncFault::SequenceGap { .. } => "sequence_gap",
            SyncFault::BackfillUnavailable { .. } => "backfill_unavailable",
            SyncFault::Lagged { .. } => "lagged",
        }
    }
}
