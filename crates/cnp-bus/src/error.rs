//! Error types for the message channel.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can occur on the message channel.
#[derive(Debug, Error)]
pub enum BusError {
    /// Topic is not publishable (empty or contains wildcards).
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// Offending topic.
        topic: String,
        /// Why it was refused.
        reason: &'static str,
    },

    /// Subscription filter is malformed.
    #[error("invalid filter '{filter}': {reason}")]
    InvalidFilter {
        /// Offending filter.
        filter: String,
        /// Why it was refused.
        reason: &'static str,
    },

    /// Payload is not UTF-8 and cannot be carried in a text frame.
    #[error("payload is not valid UTF-8")]
    InvalidPayload,

    /// The client is no longer connected to the broker.
    #[error("transport disconnected")]
    Disconnected,

    /// The broker did not answer in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Failed to bind the broker listener.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// Frame could not be encoded or decoded.
    #[error("frame error: {0}")]
    Frame(String),

    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        Self::Frame(err.to_string())
    }
}

impl From<tokio_util::codec::LinesCodecError> for BusError {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::Io(e) => Self::Io(e),
            tokio_util::codec::LinesCodecError::MaxLineLengthExceeded => {
                Self::Frame("frame exceeds maximum length".into())
            }
        }
    }
}

/// Result type for message channel operations.
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_topic_display() {
        let err = BusError::InvalidTopic {
            topic: "/assign/+".into(),
            reason: "wildcards are not publishable",
        };
        assert_eq!(
            err.to_string(),
            "invalid topic '/assign/+': wildcards are not publishable"
        );
    }

    #[test]
    fn line_length_maps_to_frame_error() {
        let err: BusError = tokio_util::codec::LinesCodecError::MaxLineLengthExceeded.into();
        assert!(matches!(err, BusError::Frame(_)));
    }
}
