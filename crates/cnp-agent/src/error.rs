//! Error types for cnp-agent.

use cnp_bus::BusError;
use cnp_proto::ProtoError;
use thiserror::Error;

use crate::negotiation::NegotiationError;

/// Errors that end an agent's run loop or reject its configuration.
///
/// Malformed and stale messages never surface here; they are dropped by the
/// receiving agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Publishing or subscribing failed.
    #[error("transport error: {0}")]
    Transport(#[from] BusError),

    /// The inbox closed: the agent lost its broker connection.
    #[error("transport disconnected")]
    Disconnected,

    /// An outgoing message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// The round state machine was driven out of order.
    #[error("negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Invalid capability table entry.
    #[error("invalid capability: {0}")]
    Capability(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_errors_convert() {
        let err: AgentError = BusError::Disconnected.into();
        assert_eq!(err.to_string(), "transport error: transport disconnected");
    }

    #[test]
    fn capability_display() {
        let err = AgentError::Capability("bad".into());
        assert_eq!(err.to_string(), "invalid capability: bad");
    }
}
