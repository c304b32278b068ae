use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, NetworkOptions, Packet, QoS, TlsConfiguration,
    Transport,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{BroadcastError, Broadcaster};
use crate::config::MqttConfig;

pub type MessageHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// MQTT topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// QoS 1 publisher and subscriber over a single broker connection.
///
/// Publishes while the connection is down are dropped, not queued.
#[derive(Clone)]
pub struct MqttBroadcaster {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    handlers: Arc<RwLock<Vec<(String, MessageHandler)>>>,
}

impl MqttBroadcaster {
    /// Spawns the connection task; it runs until `cancel` fires.
    pub fn connect(config: &MqttConfig, cancel: CancellationToken) -> Result<Self, BroadcastError> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        if let Some(ca_cert) = &config.ca_cert {
            let ca = std::fs::read(ca_cert)?;
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(config.connect_timeout_secs);
        eventloop.set_network_options(network);

        let broadcaster = Self {
            client,
            connected: Arc::new(AtomicBool::new(false)),
            handlers: Arc::new(RwLock::new(Vec::new())),
        };

        let task = broadcaster.clone();
        let filters = config.subscribe.clone();
        let reconnect_delay = config.reconnect_delay();
        info!(host = %config.host, port = config.port, "starting MQTT connection");
        tokio::spawn(async move {
            task.run(eventloop, filters, reconnect_delay, cancel).await;
        });

        Ok(broadcaster)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Registers `handler` for messages whose topic matches `filter`.
    pub async fn on_message(&self, filter: impl Into<String>, handler: MessageHandler) {
        let filter = filter.into();
        if self.is_connected()
            && let Err(e) = self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce)
        {
            warn!(filter = %filter, error = %e, "failed to subscribe");
        }
        self.handlers.write().await.push((filter, handler));
    }

    async fn run(
        &self,
        mut eventloop: EventLoop,
        filters: Vec<String>,
        reconnect_delay: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("MQTT shutdown requested");
                    let _ = self.client.try_disconnect();
                    return;
                }
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("connected to MQTT broker");
                    self.connected.store(true, Ordering::Relaxed);
                    self.resubscribe(&filters).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.dispatch(&publish.topic, &publish.payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.store(false, Ordering::Relaxed);
                    error!(error = %e, delay = ?reconnect_delay, "MQTT connection error, reconnecting");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            }
        }
    }

    async fn resubscribe(&self, filters: &[String]) {
        let handlers = self.handlers.read().await;
        let all = filters.iter().chain(handlers.iter().map(|(f, _)| f));
        for filter in all {
            // try_subscribe: awaiting here would stall the event loop we run on.
            match self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                Ok(()) => debug!(filter = %filter, "subscribed"),
                Err(e) => warn!(filter = %filter, error = %e, "failed to subscribe"),
            }
        }
    }

    async fn dispatch(&self, topic: &str, payload: &[u8]) {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(topic, error = %e, "ignoring non-JSON MQTT message");
                return;
            }
        };

        debug!(topic, "MQTT message received");
        let handlers = self.handlers.read().await;
        for (filter, handler) in handlers.iter() {
            if topic_matches(filter, topic) {
                handler(topic, &value);
            }
        }
    }
}

#[async_trait]
impl Broadcaster for MqttBroadcaster {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BroadcastError> {
        if !self.is_connected() {
            return Err(BroadcastError::Disconnected);
        }

        let bytes = serde_json::to_vec(payload)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, bytes)
            .await?;

        debug!(topic, "published");
        Ok(())
    }
}
