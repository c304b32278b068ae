mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpPushGateway;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("push gateway returned {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Delivers notifications to every device subscribed to a topic.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send_to_topic(
        &self,
        topic: &str,
        title: &str,
        body: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), PushError>;
}

/// Logs notifications instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPushGateway;

#[async_trait]
impl PushGateway for LogPushGateway {
    async fn send_to_topic(
        &self,
        topic: &str,
        title: &str,
        body: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), PushError> {
        tracing::info!(topic, title, body, ?data, "push notification");
        Ok(())
    }
}
