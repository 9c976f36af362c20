//! Error types for the stage entity gateway

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Gateway error
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Credentials rejected and the refresh did not help
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// Server returned a non-2xx status
    #[error("request failed with status {status}: {message}")]
    RequestFailed {
        status: u16,
        message: String,
        field_errors: BTreeMap<String, Vec<String>>,
    },

    /// Invalid response from server
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Call did not settle within the configured bound
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        GatewayError::RequestFailed {
            status,
            message: message.into(),
            field_errors: BTreeMap::new(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::RequestFailed { status, .. } => Some(*status),
            GatewayError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, GatewayError::AuthExpired(_))
    }

    /// Failures that may succeed when repeated unchanged
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(_) | GatewayError::Timeout(_) => true,
            GatewayError::RequestFailed { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Error body shape returned by the backend: `{ "message": ..., "errors": { field: [..] } }`
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default, alias = "error", alias = "detail")]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: BTreeMap<String, FieldMessages>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum FieldMessages {
    One(String),
    Many(Vec<String>),
}

impl FieldMessages {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            FieldMessages::One(message) => vec![message],
            FieldMessages::Many(messages) => messages,
        }
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
