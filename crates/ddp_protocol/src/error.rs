//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding DDP frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame was not valid JSON.
    #[error("invalid JSON frame: {message}")]
    InvalidJson {
        /// Parser message.
        message: String,
    },

    /// The frame was JSON but not an object with a string `msg`.
    #[error("frame has no usable msg discriminator")]
    MissingKind,

    /// The `msg` discriminator names a message this client does not handle.
    #[error("unknown message kind: {kind}")]
    UnknownMessage {
        /// The unrecognised discriminator.
        kind: String,
    },

    /// A known message kind with missing or mistyped fields.
    #[error("malformed {kind} message: {message}")]
    Malformed {
        /// The message kind.
        kind: String,
        /// Decoder message.
        message: String,
    },

    /// Encoding a message failed.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Encoder message.
        message: String,
    },
}

impl ProtocolError {
    /// Create a malformed message error.
    pub fn malformed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create an encoding error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidJson {
            message: err.to_string(),
        }
    }
}
