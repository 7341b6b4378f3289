//! Error types for the EJSON crate.

use thiserror::Error;

/// Result type for EJSON operations.
pub type EjsonResult<T> = Result<T, EjsonError>;

/// Errors that can occur while encoding or decoding EJSON.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EjsonError {
    /// The input was not valid JSON text.
    #[error("invalid JSON: {message}")]
    InvalidJson {
        /// Description of the parse error.
        message: String,
    },

    /// A value had a different shape than the one required.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The expected shape.
        expected: &'static str,
        /// The shape that was found.
        found: String,
    },

    /// NaN and infinities have no JSON representation.
    #[error("non-finite number cannot be encoded")]
    NonFiniteNumber,

    /// A `$date` payload is outside the representable range.
    #[error("invalid $date value: {millis}")]
    InvalidDate {
        /// The offending milliseconds value.
        millis: String,
    },

    /// Decoding into a typed model failed.
    #[error("typed decode failed: {message}")]
    Decode {
        /// Description of the decode error.
        message: String,
    },

    /// Encoding a typed model failed.
    #[error("typed encode failed: {message}")]
    Encode {
        /// Description of the encode error.
        message: String,
    },
}

impl EjsonError {
    /// Create a type mismatch error.
    pub fn type_mismatch(expected: &'static str, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected,
            found: found.into(),
        }
    }

    /// Create an invalid JSON error.
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::InvalidJson {
            message: message.into(),
        }
    }

    /// Create a typed decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a typed encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }
}
