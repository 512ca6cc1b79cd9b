//! Encode-and-publish helper shared by both agent roles.

use cnp_bus::Transport;
use serde::Serialize;

use crate::error::AgentError;

/// Encodes `message` as JSON and publishes it on `topic`.
pub(crate) async fn publish<T>(
    transport: &dyn Transport,
    topic: &str,
    message: &T,
) -> Result<(), AgentError>
where
    T: Serialize + Sync,
{
    let payload = cnp_proto::encode(message)?;
    transport.publish(topic, payload).await?;
    Ok(())
}
