//! Exception model shared by the dispatcher and every plugin implementation.
//!
//! A [`CapacitorException`] is the only error that crosses the plugin call
//! surface. Its optional [`ExceptionCode`] lets callers branch on *why* a call
//! failed without parsing messages:
//!
//! | Code | Meaning |
//! |------|---------|
//! | [`Unimplemented`](ExceptionCode::Unimplemented) | no reachable implementation has the method |
//! | [`Unavailable`](ExceptionCode::Unavailable) | the method exists but a prerequisite is missing |
//!
//! Errors without a code are passed through unchanged from whichever
//! implementation raised them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Machine-readable classification of a [`CapacitorException`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionCode {
    /// The API is not implemented for the current platform.
    Unimplemented,
    /// The API exists but cannot be used right now (missing capability,
    /// permission, connectivity, platform version...).
    Unavailable,
}

impl ExceptionCode {
    /// Returns the wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form diagnostic data attached to an exception.
pub type ExceptionData = Map<String, Value>;

/// The error type of every plugin call.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CapacitorException {
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<ExceptionCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<ExceptionData>,
}

impl CapacitorException {
    /// Creates an unclassified exception.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            data: None,
        }
    }

    /// Creates an exception with the given code.
    pub fn with_code(message: impl Into<String>, code: ExceptionCode) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            data: None,
        }
    }

    /// Creates an [`ExceptionCode::Unimplemented`] exception.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::with_code(message, ExceptionCode::Unimplemented)
    }

    /// Creates an [`ExceptionCode::Unavailable`] exception.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_code(message, ExceptionCode::Unavailable)
    }

    /// Attaches one diagnostic entry, keeping any existing ones.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<ExceptionCode> {
        self.code
    }

    pub fn data(&self) -> Option<&ExceptionData> {
        self.data.as_ref()
    }

    pub fn is_unimplemented(&self) -> bool {
        self.code == Some(ExceptionCode::Unimplemented)
    }

    pub fn is_unavailable(&self) -> bool {
        self.code == Some(ExceptionCode::Unavailable)
    }
}

impl From<serde_json::Error> for CapacitorException {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("serialization error: {err}"))
    }
}

/// Result type of every plugin call.
pub type PluginResult<T> = Result<T, CapacitorException>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn code_serializes_screaming() {
        let err = CapacitorException::unavailable("offline").with_data("reason", "network");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(
            value,
            json!({"message": "offline", "code": "UNAVAILABLE", "data": {"reason": "network"}})
        );
    }

    #[test]
    fn unclassified_error_omits_code() {
        let err: CapacitorException =
            serde_json::from_value(json!({"message": "boom"})).unwrap();
        assert_eq!(err.code(), None);
        assert!(err.data().is_none());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn with_data_accumulates() {
        let err = CapacitorException::unimplemented("nope")
            .with_data("plugin", "Foo")
            .with_data("method", "bar");
        let data = err.data().unwrap();
        assert_eq!(data["plugin"], "Foo");
        assert_eq!(data["method"], "bar");
        assert!(err.is_unimplemented());
    }
}
