//! Line-delimited JSON frames spoken between [`TcpTransport`] clients and
//! the [`BrokerServer`].
//!
//! [`TcpTransport`]: crate::tcp::TcpTransport
//! [`BrokerServer`]: crate::broker::BrokerServer

use serde::{Deserialize, Serialize};

use crate::error::{BusError, BusResult};

/// Default maximum frame length in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    /// Client asks to receive messages matching `filter`.
    Subscribe {
        /// Subscription filter.
        filter: String,
    },
    /// Client publishes a message.
    Publish {
        /// Concrete topic.
        topic: String,
        /// JSON message body.
        payload: String,
    },
    /// Broker confirms a subscription is active.
    SubAck {
        /// Filter that is now active.
        filter: String,
    },
    /// Broker delivers a message.
    Message {
        /// Concrete topic.
        topic: String,
        /// JSON message body.
        payload: String,
    },
    /// Broker could not process a client frame.
    Error {
        /// Human-readable reason.
        reason: String,
    },
}

impl Frame {
    /// Builds a publish frame from a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidPayload`] if the payload is not UTF-8.
    pub fn publish(topic: &str, payload: Vec<u8>) -> BusResult<Self> {
        let payload = String::from_utf8(payload).map_err(|_| BusError::InvalidPayload)?;
        Ok(Self::Publish {
            topic: topic.to_string(),
            payload,
        })
    }

    /// Encodes the frame as a single line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Frame`] if serialization fails.
    pub fn to_line(&self) -> BusResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a frame from one line.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Frame`] if the line is not a valid frame.
    pub fn from_line(line: &str) -> BusResult<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_tagged_by_op() {
        let line = Frame::Subscribe {
            filter: "/cfp".into(),
        }
        .to_line()
        .unwrap();
        assert_eq!(line, r#"{"op":"subscribe","filter":"/cfp"}"#);

        let ack = Frame::from_line(r#"{"op":"sub_ack","filter":"/cfp"}"#).unwrap();
        assert_eq!(
            ack,
            Frame::SubAck {
                filter: "/cfp".into()
            }
        );
    }

    #[test]
    fn payload_json_is_escaped_inside_a_single_line() {
        let frame = Frame::publish("/bids", br#"{"cfp_id":1}"#.to_vec()).unwrap();
        let line = frame.to_line().unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(Frame::from_line(&line).unwrap(), frame);
    }

    #[test]
    fn non_utf8_payload_is_refused() {
        assert!(matches!(
            Frame::publish("/bids", vec![0xff, 0xfe]),
            Err(BusError::InvalidPayload)
        ));
    }

    #[test]
    fn unknown_op_is_a_frame_error() {
        assert!(matches!(
            Frame::from_line(r#"{"op":"teleport"}"#),
            Err(BusError::Frame(_))
        ));
    }
}
