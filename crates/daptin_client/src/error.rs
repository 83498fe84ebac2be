//! Error types for the client.

use daptin_protocol::ProtocolError;
use serde_json::Value;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while talking to a Daptin server.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No token, or the server rejected it.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport failure; no response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("server error (HTTP {status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message, taken from the body when possible.
        message: String,
        /// Raw error payload when the body was JSON.
        body: Option<Value>,
    },

    /// An expected catalog entry is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resumable upload session is missing from local storage.
    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    /// An upload could not be carried out.
    #[error("upload error: {0}")]
    Upload(String),

    /// A request failed client-side validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The server's table catalog is empty.
    #[error("table catalog is empty")]
    EmptyCatalog,

    /// An upload session was driven through an illegal transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A response body could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The local session store failed.
    #[error("session store error: {0}")]
    Store(String),

    /// Local I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Creates an error for a part response that carried no ETag.
    pub fn missing_etag(part_number: u32) -> Self {
        Self::Upload(format!(
            "part {part_number} response carried no ETag header"
        ))
    }

    /// Returns the HTTP status if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for authentication failures.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Validation(message) => ClientError::Validation(message),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ClientError::Server {
            status: 500,
            message: "boom".into(),
            body: None,
        };
        assert_eq!(err.to_string(), "server error (HTTP 500): boom");
        assert_eq!(err.status(), Some(500));

        let err = ClientError::missing_etag(3);
        assert!(err.to_string().contains("part 3"));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn protocol_validation_maps_to_validation() {
        let err: ClientError = ProtocolError::Validation("root entity".into()).into();
        assert!(matches!(err, ClientError::Validation(_)));

        let err: ClientError = ProtocolError::invalid_structure("bad").into();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn auth_detection() {
        assert!(ClientError::Auth("no token".into()).is_auth());
        assert!(!ClientError::EmptyCatalog.is_auth());
    }
}
