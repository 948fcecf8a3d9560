//! Error types for prgate-remote

use thiserror::Error;

/// Errors raised while talking to a hosting or CI provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request never produced a response (DNS, TLS, connection reset)
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The provider answered with an unexpected status code
    #[error("{method} {url} returned {status}: {message}")]
    Status {
        method: String,
        url: String,
        status: u16,
        message: String,
    },

    /// The addressed resource does not exist (404, or 422 for unknown refs)
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Credentials were missing or rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The response body did not match the expected shape
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// A page cursor could not be interpreted
    #[error("invalid page cursor: {0}")]
    InvalidCursor(String),
}

impl TransportError {
    /// Whether this error denotes a missing resource rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}
