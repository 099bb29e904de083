//! Error types for the call bridge.
//!
//! [`TransportError`] covers framing, [`BridgeError`] covers everything a
//! caller can observe on a call, and [`RemoteError`] is the portable form in
//! which a handler's failure crosses the process boundary.

use std::io;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use crate::jsonrpc::JsonRpcError;
use crate::stream::StreamId;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The byte source ended between frames.
    #[error("connection closed")]
    Closed,

    /// Missing Content-Length header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// Missing Stream-Id header.
    #[error("missing Stream-Id header")]
    MissingStreamId,

    /// A header value could not be parsed.
    #[error("invalid header: {line}")]
    InvalidHeader {
        /// The offending header line.
        line: String,
    },

    /// The announced payload exceeds the frame limit.
    #[error("frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Announced payload length.
        length: usize,
        /// Configured maximum.
        limit: usize,
    },
}

/// Errors observed by a bridge caller.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The peer failed the protocol handshake. Never retried.
    #[error("handshake failed: {reason}")]
    Handshake {
        /// Why the handshake was rejected.
        reason: String,
    },

    /// The connection ended before the call completed.
    #[error("connection to peer lost")]
    ConnectionLost,

    /// The caller's deadline passed before a reply arrived.
    #[error("call `{method}` exceeded its {deadline:?} deadline")]
    DeadlineExceeded {
        /// Method that was abandoned.
        method: String,
        /// Deadline that elapsed.
        deadline: Duration,
    },

    /// A stream id is already bound on this side of the connection.
    #[error("stream {stream} is already bound")]
    StreamInUse {
        /// Stream that was bound twice.
        stream: StreamId,
    },

    /// Frame-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON serialization/deserialization error.
    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The peer's handler returned an error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl BridgeError {
    /// Returns true when the failure concerns the connection itself rather
    /// than the outcome reported by the peer.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        !matches!(self, Self::Remote(_))
    }
}

/// Portable error kinds understood by both ends of the bridge.
///
/// The sentinel variants keep their identity across the boundary; any error
/// outside this set is carried as [`RemoteError::Message`] and only its text
/// survives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// A reader reached the end of its input.
    #[error("end of stream")]
    EndOfStream,
    /// A query expected at least one row and found none.
    #[error("no rows in result set")]
    NoRows,
    /// The connection was already returned to its pool or closed.
    #[error("connection is already closed")]
    ConnectionDone,
    /// The transaction was already committed or rolled back.
    #[error("transaction has already been committed or rolled back")]
    TransactionDone,
    /// The driver asked for the default handling of an operation.
    #[error("driver requested default handling")]
    Skip,
    /// The driver connection is unusable.
    #[error("bad connection")]
    BadConnection,
    /// An argument was consumed by a value checker.
    #[error("argument removed by value checker")]
    RemoveArgument,
    /// The handler declines the method.
    #[error("`{method}` is not implemented")]
    NotImplemented {
        /// Method the handler declined.
        method: String,
    },
    /// The peer does not know the method at all.
    #[error("unknown method `{method}`")]
    MethodNotFound {
        /// Requested method name.
        method: String,
    },
    /// The request parameters did not match the method's schema.
    #[error("invalid params: {message}")]
    InvalidParams {
        /// Decoder message.
        message: String,
    },
    /// Structured application error.
    #[error("{id}: {message}")]
    Application {
        /// Stable error identifier.
        id: String,
        /// Human-readable description.
        message: String,
        /// Status hint for outward-facing layers.
        status: u16,
    },
    /// Any other error, reduced to its message.
    #[error("{message}")]
    Message {
        /// Original error text.
        message: String,
    },
}

/// Wire codes for [`RemoteError`] kinds.
pub mod codes {
    /// End of stream.
    pub const END_OF_STREAM: i64 = 1;
    /// No rows in result set.
    pub const NO_ROWS: i64 = 2;
    /// Connection already closed.
    pub const CONNECTION_DONE: i64 = 3;
    /// Transaction already finished.
    pub const TRANSACTION_DONE: i64 = 4;
    /// Driver skip.
    pub const SKIP: i64 = 5;
    /// Bad connection.
    pub const BAD_CONNECTION: i64 = 6;
    /// Argument removed.
    pub const REMOVE_ARGUMENT: i64 = 7;
    /// Method declined by the handler.
    pub const NOT_IMPLEMENTED: i64 = 10;
    /// Structured application error.
    pub const APPLICATION: i64 = 20;
    /// Message-only error.
    pub const MESSAGE: i64 = 0;
    /// JSON-RPC "method not found".
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// JSON-RPC "invalid params".
    pub const INVALID_PARAMS: i64 = -32602;
}

impl RemoteError {
    /// Reduces any error to its portable message-only form.
    #[must_use]
    pub fn message(error: impl std::fmt::Display) -> Self {
        Self::Message {
            message: error.to_string(),
        }
    }

    /// Returns the wire code for this error kind.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::EndOfStream => codes::END_OF_STREAM,
            Self::NoRows => codes::NO_ROWS,
            Self::ConnectionDone => codes::CONNECTION_DONE,
            Self::TransactionDone => codes::TRANSACTION_DONE,
            Self::Skip => codes::SKIP,
            Self::BadConnection => codes::BAD_CONNECTION,
            Self::RemoveArgument => codes::REMOVE_ARGUMENT,
            Self::NotImplemented { .. } => codes::NOT_IMPLEMENTED,
            Self::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => codes::INVALID_PARAMS,
            Self::Application { .. } => codes::APPLICATION,
            Self::Message { .. } => codes::MESSAGE,
        }
    }

    /// Encodes the error as a JSON-RPC error object.
    #[must_use]
    pub fn to_wire(&self) -> JsonRpcError {
        let data = match self {
            Self::NotImplemented { method } | Self::MethodNotFound { method } => {
                Some(json!({ "method": method }))
            }
            Self::Application { id, status, .. } => Some(json!({ "id": id, "status": status })),
            _ => None,
        };
        let message = match self {
            Self::Application { message, .. } => message.clone(),
            _ => self.to_string(),
        };
        JsonRpcError {
            code: self.code(),
            message,
            data,
        }
    }

    /// Decodes a JSON-RPC error object; unknown codes degrade to
    /// [`RemoteError::Message`].
    #[must_use]
    pub fn from_wire(error: JsonRpcError) -> Self {
        let JsonRpcError {
            code,
            message,
            data,
        } = error;
        match code {
            codes::END_OF_STREAM => Self::EndOfStream,
            codes::NO_ROWS => Self::NoRows,
            codes::CONNECTION_DONE => Self::ConnectionDone,
            codes::TRANSACTION_DONE => Self::TransactionDone,
            codes::SKIP => Self::Skip,
            codes::BAD_CONNECTION => Self::BadConnection,
            codes::REMOVE_ARGUMENT => Self::RemoveArgument,
            codes::NOT_IMPLEMENTED => Self::NotImplemented {
                method: data_string(data.as_ref(), "method").unwrap_or_default(),
            },
            codes::METHOD_NOT_FOUND => Self::MethodNotFound {
                method: data_string(data.as_ref(), "method").unwrap_or_default(),
            },
            codes::INVALID_PARAMS => Self::InvalidParams {
                message: message
                    .strip_prefix("invalid params: ")
                    .map_or_else(|| message.clone(), str::to_owned),
            },
            codes::APPLICATION => Self::Application {
                id: data_string(data.as_ref(), "id").unwrap_or_default(),
                status: data
                    .as_ref()
                    .and_then(|value| value.get("status"))
                    .and_then(Value::as_u64)
                    .and_then(|status| u16::try_from(status).ok())
                    .unwrap_or(500),
                message,
            },
            _ => Self::Message { message },
        }
    }
}

fn data_string(data: Option<&Value>, key: &str) -> Option<String> {
    data.and_then(|value| value.get(key))
        .and_then(Value::as_str)
        .map(str::to_owned)
}
