//! Error types for protocol decoding and validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding or validating wire types.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload was not valid JSON for the expected shape.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload was valid JSON but structurally unusable.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    /// A request failed client-side validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Base64 content could not be decoded.
    #[error("invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl ProtocolError {
    /// Creates an invalid-structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::invalid_structure("missing upload_id");
        assert_eq!(err.to_string(), "invalid structure: missing upload_id");

        let err = ProtocolError::Validation("root entity must be specified".into());
        assert!(err.to_string().contains("root entity"));
    }
}
