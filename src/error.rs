//! Error types for hubcast.
//!
//! All errors are strongly typed using thiserror. Failures are scoped: a
//! protocol error keeps the connection open, a transport read error tears
//! down the single affected client, a source error is retried with backoff.
//! No error in this crate terminates the process.

use thiserror::Error;

/// Protocol errors raised while handling an inbound client command.
///
/// These are always answered with an error acknowledgment on the wire; the
/// connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed command: {reason}")]
    MalformedCommand {
        reason: String,
    },

    #[error("topic is empty")]
    EmptyTopics,

    #[error("illegal method: {method}")]
    UnknownMethod {
        method: String,
    },

    #[error("topic not found: {topic}")]
    TopicNotFound {
        topic: String,
    },

    #[error("handler clone failed: {topic}")]
    HandlerIntegrity {
        topic: String,
    },
}

/// Transport errors for the framed connection boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("read deadline exceeded")]
    ReadTimeout,

    #[error("write timed out after {duration_ms}ms")]
    WriteTimeout {
        duration_ms: u64,
    },

    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        size: usize,
        limit: usize,
    },

    #[error("transport failure: {message}")]
    Io {
        message: String,
    },
}

/// External event source errors.
///
/// Sources are retried indefinitely; these surface only in logs and in the
/// reader's backoff path.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source read failed: {message}")]
    Read {
        message: String,
    },

    #[error("source disconnected: {message}")]
    Disconnected {
        message: String,
    },
}

/// Top-level error type for hubcast.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("serialization error: {message}")]
    Serialization {
        message: String,
    },

    #[error("hub is shut down")]
    ShutDown,
}

/// Result alias for hubcast operations.
pub type HubResult<T> = Result<T, HubError>;

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
