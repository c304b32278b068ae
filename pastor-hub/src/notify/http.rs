use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::json;

use super::{PushError, PushGateway};

/// Posts topic messages to an HTTP push relay.
#[derive(Clone)]
pub struct HttpPushGateway {
    http: HttpClient,
    endpoint: String,
    token: Option<String>,
}

impl HttpPushGateway {
    /// Every request is bounded by `timeout`.
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PushError> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self::with_http_client(http, endpoint, token))
    }

    pub fn with_http_client(
        http: HttpClient,
        endpoint: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            token,
        }
    }
}

fn message(topic: &str, title: &str, body: &str, data: &BTreeMap<String, String>) -> serde_json::Value {
    json!({
        "message": {
            "topic": topic,
            "notification": { "title": title, "body": body },
            "data": data,
            "android": {
                "priority": "high",
                "notification": {
                    "channel_id": "high_importance_channel",
                    "notification_priority": "PRIORITY_MAX",
                    "default_sound": true,
                },
            },
            "apns": {
                "payload": {
                    "aps": {
                        "sound": "default",
                        "alert": { "title": title, "body": body },
                    },
                },
            },
        },
    })
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send_to_topic(
        &self,
        topic: &str,
        title: &str,
        body: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), PushError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&message(topic, title, body, data));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(topic, "push notification accepted");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(PushError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
