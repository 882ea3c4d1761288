//! Error types for the promise core

use crate::value::{JsString, JsValue};
use thiserror::Error;

/// Main error type.
///
/// Everything except `Internal` is a user-level error: when it surfaces inside
/// a job it is converted with [`JsError::to_value`] and used as a rejection
/// reason instead of escaping the drain loop.
#[derive(Debug, Error)]
pub enum JsError {
    #[error("TypeError: {message}")]
    TypeError { message: String },

    /// A value thrown by a callable
    #[error("Uncaught {value:?}")]
    ThrownValue { value: JsValue },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JsError {
    pub fn type_error(message: impl Into<String>) -> Self {
        JsError::TypeError {
            message: message.into(),
        }
    }

    /// Wrap a thrown value
    pub fn thrown(value: JsValue) -> Self {
        JsError::ThrownValue { value }
    }

    /// Create an internal error for unexpected runtime states
    /// These should never happen in correctly-written code
    pub fn internal_error(message: impl Into<String>) -> Self {
        JsError::Internal(message.into())
    }

    pub fn is_type_error(&self) -> bool {
        matches!(self, JsError::TypeError { .. })
    }

    /// The value a handler would observe as the rejection reason.
    pub fn to_value(&self) -> JsValue {
        match self {
            JsError::ThrownValue { value } => value.clone(),
            JsError::TypeError { message } => {
                JsValue::String(JsString::from(format!("TypeError: {}", message)))
            }
            JsError::Config { message } => {
                JsValue::String(JsString::from(format!("ConfigError: {}", message)))
            }
            JsError::Internal(msg) => {
                JsValue::String(JsString::from(format!("InternalError: {}", msg)))
            }
        }
    }
}

impl From<serde_json::Error> for JsError {
    fn from(err: serde_json::Error) -> Self {
        JsError::Config {
            message: err.to_string(),
        }
    }
}
