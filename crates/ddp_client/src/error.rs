//! Error types for the session engine.

use ddp_ejson::EjsonError;
use ddp_protocol::{MethodError, ProtocolError};
use thiserror::Error;

/// Result type for client operations.
pub type DdpResult<T> = Result<T, DdpError>;

/// Errors that can occur while talking to a DDP server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DdpError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A frame could not be encoded or decoded.
    #[error("frame error: {0}")]
    Frame(#[from] ProtocolError),

    /// A document could not be converted.
    #[error("document error: {0}")]
    Document(#[from] EjsonError),

    /// The server answered a method call or subscription with an error.
    #[error("server error: {0}")]
    Method(MethodError),

    /// The session is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The session was closed while the call was pending.
    #[error("session disconnected before a result arrived")]
    Disconnected,

    /// The outcome was dropped before it was produced.
    #[error("operation cancelled")]
    Cancelled,

    /// A remote mutation was attempted on a collection with no client.
    #[error("collection {collection} is not bound to a client")]
    NotBound {
        /// Collection name.
        collection: String,
    },

    /// The server rejected every protocol version we offered.
    #[error("protocol version rejected (server suggested {suggested:?})")]
    VersionRejected {
        /// Version the server would accept.
        suggested: Option<String>,
    },

    /// No tokio runtime is available.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

impl DdpError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            DdpError::Transport { retryable, .. } => *retryable,
            DdpError::Timeout | DdpError::NotConnected | DdpError::Disconnected => true,
            _ => false,
        }
    }

    /// Returns the server error object, if this is one.
    pub fn server_error(&self) -> Option<&MethodError> {
        match self {
            DdpError::Method(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MethodError> for DdpError {
    fn from(err: MethodError) -> Self {
        Self::Method(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(DdpError::transport_retryable("connection lost").is_retryable());
        assert!(!DdpError::transport_fatal("bad url").is_retryable());
        assert!(DdpError::Timeout.is_retryable());
        assert!(DdpError::Disconnected.is_retryable());
        assert!(!DdpError::Cancelled.is_retryable());
        assert!(!DdpError::Method(MethodError::new(500, "boom")).is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(DdpError::NotConnected.to_string(), "not connected to server");

        let err = DdpError::NotBound {
            collection: "todos".into(),
        };
        assert!(err.to_string().contains("todos"));

        let err: DdpError = MethodError::new(404, "Not found").into();
        assert_eq!(err.to_string(), "server error: Not found [404]");
        assert_eq!(err.server_error().map(|e| e.reason.as_deref()), Some(Some("Not found")));
    }

    #[test]
    fn frame_errors_convert() {
        let err: DdpError = ProtocolError::MissingKind.into();
        assert!(matches!(err, DdpError::Frame(ProtocolError::MissingKind)));
    }
}
