//! Error types for the cnp-proto crate.

use thiserror::Error;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a message.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a message.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),

    /// Topic does not belong to the negotiation namespace.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            ProtoError::MissingField("bid_time").to_string(),
            "missing required field: bid_time"
        );
        assert_eq!(
            ProtoError::UnknownTopic("/weather".into()).to_string(),
            "unknown topic: /weather"
        );
    }
}
