//! Error types for cnp-node.

use thiserror::Error;

/// Errors raised while configuring or running fleet components.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Broker failure.
    #[error("broker error: {0}")]
    Bus(#[from] cnp_bus::BusError),

    /// An agent stopped with an error.
    #[error("agent error: {0}")]
    Agent(#[from] cnp_agent::AgentError),

    /// Invalid protocol value in the configuration.
    #[error("protocol error: {0}")]
    Protocol(#[from] cnp_proto::ProtoError),

    /// A fleet task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = NodeError::Config("bad".to_string());
        assert_eq!(err.to_string(), "configuration error: bad");
    }

    #[test]
    fn agent_errors_convert() {
        let err: NodeError = cnp_agent::AgentError::Disconnected.into();
        assert_eq!(err.to_string(), "agent error: transport disconnected");
    }
}
