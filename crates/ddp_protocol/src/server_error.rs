//! The error object carried by `nosub`, `result` and server `error` frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Error code of a server error: numeric (`404`) or symbolic (`"not-found"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    /// Numeric code.
    Number(i64),
    /// Symbolic code.
    Text(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Number(n) => write!(f, "{n}"),
            ErrorCode::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(value: i64) -> Self {
        ErrorCode::Number(value)
    }
}

impl From<i32> for ErrorCode {
    fn from(value: i32) -> Self {
        ErrorCode::Number(value.into())
    }
}

impl From<&str> for ErrorCode {
    fn from(value: &str) -> Self {
        ErrorCode::Text(value.to_string())
    }
}

/// A server-reported error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodError {
    /// Error code.
    pub error: ErrorCode,
    /// Human readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Full message, when the server sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Free-form details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Server-side error class name, e.g. `Meteor.Error`.
    #[serde(
        rename = "errorType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_type: Option<String>,
}

impl MethodError {
    /// Creates an error with a code and reason.
    pub fn new(error: impl Into<ErrorCode>, reason: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: Some(reason.into()),
            message: None,
            details: None,
            error_type: None,
        }
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{reason} [{}]", self.error),
            None => write!(f, "[{}]", self.error),
        }
    }
}

impl std::error::Error for MethodError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_numeric_and_text_codes() {
        let err: MethodError =
            serde_json::from_value(json!({"error": 404, "reason": "Not found"})).unwrap();
        assert_eq!(err.error, ErrorCode::Number(404));
        assert_eq!(err.to_string(), "Not found [404]");

        let err: MethodError = serde_json::from_value(json!({
            "error": "not-allowed",
            "errorType": "Meteor.Error"
        }))
        .unwrap();
        assert_eq!(err.error, ErrorCode::Text("not-allowed".into()));
        assert_eq!(err.error_type.as_deref(), Some("Meteor.Error"));
        assert_eq!(err.to_string(), "[not-allowed]");
    }

    #[test]
    fn encodes_without_empty_fields() {
        let err = MethodError::new(403, "denied");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"error": 403, "reason": "denied"})
        );
    }
}
