mod mqtt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use mqtt::{MessageHandler, MqttBroadcaster, topic_matches};

pub mod topics {
    pub const TELEMETRY: &str = "nodes/telemetry";
    pub const FENCE_CREATE: &str = "fences/create";
    pub const FENCE_UPDATE: &str = "fences/update";
    pub const FENCE_DELETE: &str = "fences/delete";
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broker connection is down")]
    Disconnected,
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to read CA certificate: {0}")]
    Certificate(#[from] std::io::Error),
}

/// Fire-and-forget fan-out to external subscribers.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BroadcastError>;
}

/// Used when no broker is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBroadcaster;

#[async_trait]
impl Broadcaster for NullBroadcaster {
    async fn publish(&self, topic: &str, _payload: &Value) -> Result<(), BroadcastError> {
        tracing::debug!(topic, "no broker configured, dropping publish");
        Ok(())
    }
}
