//! Batch telemetry ingestion.
//!
//! Every entry of a batch is processed on its own: a failing entry never
//! aborts its neighbours, and the batch always yields one [`EntryResult`]
//! per input item. Per entry the pipeline
//!
//! 1. reconciles the node record (best effort),
//! 2. persists the normalized event (the only fatal step),
//! 3. publishes the event on [`topics::TELEMETRY`],
//! 4. materializes an [`Alert`] when the device flagged one,
//! 5. checks the reading against the farm's fences and, on a breach that
//!    clears the cooldown, sends a push notification and a fence-breach order.

pub mod classify;
pub mod mapping;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use pastor_core::{
    Alert, AlertId, EventId, EventType, FarmId, Node, NodeId, TelemetryEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use ulid::Ulid;

use crate::broadcast::{Broadcaster, NullBroadcaster, topics};
use crate::clock::{Clock, SystemClock};
use crate::cooldown::{CooldownMode, CooldownTracker};
use crate::geofence::{GeofenceEvaluator, GeofencePolicy};
use crate::notify::{LogPushGateway, PushGateway};
use crate::orders::{FenceBreach, OrderDispatcher};
use crate::registry::Registries;

pub use classify::AnomalyClassifier;
pub use mapping::{FieldMapping, Reading, SkipReason, Skipped};

pub const BATCH_MESSAGE: &str = "Telemetry data processed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Ok,
    Error,
    Partial,
    Skipped,
}

/// Outcome of one batch entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_error: Option<String>,
}

impl EntryResult {
    fn new(node_id: Option<NodeId>, status: EntryStatus) -> Self {
        Self {
            node_id,
            status,
            event_id: None,
            reason: None,
            error: None,
            warning: None,
            alert_error: None,
        }
    }

    pub fn ok(node_id: NodeId, event_id: EventId) -> Self {
        Self {
            event_id: Some(event_id),
            ..Self::new(Some(node_id), EntryStatus::Ok)
        }
    }

    pub fn error(node_id: NodeId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(Some(node_id), EntryStatus::Error)
        }
    }

    pub fn partial(node_id: NodeId, event_id: EventId, alert_error: impl Into<String>) -> Self {
        Self {
            event_id: Some(event_id),
            warning: Some("Event inserted but alert failed".to_string()),
            alert_error: Some(alert_error.into()),
            ..Self::new(Some(node_id), EntryStatus::Partial)
        }
    }

    pub fn skipped(skipped: Skipped) -> Self {
        Self {
            reason: Some(skipped.reason.to_string()),
            ..Self::new(skipped.node_id, EntryStatus::Skipped)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub message: String,
    pub results: Vec<EntryResult>,
    /// Every payload key seen in the batch, sorted.
    pub seen_event_data_keys: Vec<String>,
}

/// Deployment-specific knobs of the pipeline.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Farm used for entries that do not name one.
    pub default_farm_id: Option<FarmId>,
    /// Contact attached to fence-breach orders.
    pub breach_contact_phone: Option<String>,
    pub push_topic: String,
    pub push_title: String,
    pub batch_timeout: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            default_farm_id: None,
            breach_contact_phone: None,
            push_topic: "alerts_all".to_string(),
            push_title: "oPastor Alerta".to_string(),
            batch_timeout: Duration::from_secs(30),
        }
    }
}

pub struct IngestorBuilder {
    registries: Registries,
    clock: Arc<dyn Clock>,
    push: Arc<dyn PushGateway>,
    broadcaster: Arc<dyn Broadcaster>,
    cooldown_mode: CooldownMode,
    cooldown_window: Duration,
    dedupe_window: Duration,
    policy: GeofencePolicy,
    classifier: AnomalyClassifier,
    settings: IngestSettings,
}

impl IngestorBuilder {
    pub fn new(registries: Registries) -> Self {
        Self {
            registries,
            clock: Arc::new(SystemClock),
            push: Arc::new(LogPushGateway),
            broadcaster: Arc::new(NullBroadcaster),
            cooldown_mode: CooldownMode::Enforce,
            cooldown_window: Duration::from_secs(600),
            dedupe_window: Duration::from_secs(600),
            policy: GeofencePolicy::default(),
            classifier: AnomalyClassifier::default(),
            settings: IngestSettings::default(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn push(mut self, push: Arc<dyn PushGateway>) -> Self {
        self.push = push;
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn cooldown(mut self, mode: CooldownMode, window: Duration) -> Self {
        self.cooldown_mode = mode;
        self.cooldown_window = window;
        self
    }

    pub fn dedupe_window(mut self, window: Duration) -> Self {
        self.dedupe_window = window;
        self
    }

    pub fn geofence_policy(mut self, policy: GeofencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn classifier(mut self, classifier: AnomalyClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn settings(mut self, settings: IngestSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Ingestor {
        let cooldown = CooldownTracker::new(self.cooldown_mode, self.cooldown_window, self.clock.clone());
        let orders = OrderDispatcher::new(
            self.registries.orders.clone(),
            self.clock.clone(),
            self.dedupe_window,
        );
        let geofence = GeofenceEvaluator::new(self.registries.fences.clone(), self.policy);

        Ingestor {
            registries: self.registries,
            geofence,
            cooldown: Arc::new(cooldown),
            orders,
            push: self.push,
            broadcaster: self.broadcaster,
            clock: self.clock,
            classifier: self.classifier,
            settings: self.settings,
        }
    }
}

/// An entry whose event has been persisted.
struct Stored {
    reading: Reading,
    mapping: FieldMapping,
    node: Option<Node>,
    event_id: EventId,
    published: Result<Value, serde_json::Error>,
    at: jiff::Timestamp,
}

pub struct Ingestor {
    registries: Registries,
    geofence: GeofenceEvaluator,
    cooldown: Arc<CooldownTracker>,
    orders: OrderDispatcher,
    push: Arc<dyn PushGateway>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    classifier: AnomalyClassifier,
    settings: IngestSettings,
}

impl Ingestor {
    pub fn builder(registries: Registries) -> IngestorBuilder {
        IngestorBuilder::new(registries)
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn geofence(&self) -> &GeofenceEvaluator {
        &self.geofence
    }

    pub fn cooldown(&self) -> &Arc<CooldownTracker> {
        &self.cooldown
    }

    pub fn orders(&self) -> &OrderDispatcher {
        &self.orders
    }

    pub fn broadcaster(&self) -> &Arc<dyn Broadcaster> {
        &self.broadcaster
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Processes `entries` in order. The batch deadline bounds each entry
    /// up to the point its event is stored; an entry that has not stored
    /// its event by then is reported as an error. Stored entries always run
    /// the remaining steps and report `ok` or `partial`.
    pub async fn ingest_batch(&self, entries: &[Value], mapping: FieldMapping) -> BatchReport {
        let deadline = Instant::now() + self.settings.batch_timeout;
        let mut results = Vec::with_capacity(entries.len());
        let mut seen_keys = BTreeSet::new();

        for entry in entries {
            if let Some(payload) = mapping.payload(entry) {
                seen_keys.extend(payload.keys().cloned());
            }

            let reading = match mapping.normalize(entry) {
                Ok(reading) => reading,
                Err(skipped) => {
                    tracing::debug!(reason = %skipped.reason, "skipping telemetry entry");
                    results.push(EntryResult::skipped(skipped));
                    continue;
                }
            };

            let node_id = reading.node_id.clone();
            let stored = match tokio::time::timeout_at(deadline, self.store_reading(reading, mapping)).await {
                Ok(Ok(stored)) => stored,
                Ok(Err(result)) => {
                    results.push(result);
                    continue;
                }
                Err(_) => {
                    tracing::warn!(node_id = %node_id, "batch deadline exceeded");
                    results.push(EntryResult::error(node_id, "batch deadline exceeded"));
                    continue;
                }
            };
            results.push(self.follow_up(stored).await);
        }

        BatchReport {
            message: BATCH_MESSAGE.to_string(),
            results,
            seen_event_data_keys: seen_keys.into_iter().collect(),
        }
    }

    /// Runs the per-entry pipeline for an already normalized reading.
    pub async fn ingest_reading(&self, reading: Reading, mapping: FieldMapping) -> EntryResult {
        match self.store_reading(reading, mapping).await {
            Ok(stored) => self.follow_up(stored).await,
            Err(result) => result,
        }
    }

    /// Reconciles the node and persists the event. `Err` carries the final
    /// result of an entry whose event could not be stored.
    async fn store_reading(&self, reading: Reading, mapping: FieldMapping) -> Result<Stored, EntryResult> {
        let now = self.clock.now();
        let node = self.reconcile_node(&reading, mapping).await;

        let event_type = if mapping.derives_anomalies() {
            let last = match self.registries.events.latest_event(&reading.node_id).await {
                Ok(last) => last,
                Err(e) => {
                    tracing::warn!(node_id = %reading.node_id, error = %e, "last event lookup failed");
                    None
                }
            };
            self.classifier.classify(&reading.data, now, last.as_ref())
        } else {
            reading.event_type.clone().unwrap_or(EventType::Telemetry)
        };

        let event = TelemetryEvent {
            id: EventId(Ulid::new()),
            node_id: reading.node_id.clone(),
            base_id: reading.base_id.clone(),
            event_type,
            event_data: reading.data.clone(),
            created_at: now,
        };
        let event_id = event.id;

        let published = serde_json::to_value(&event);
        if let Err(e) = self.registries.events.insert_event(event).await {
            tracing::error!(node_id = %reading.node_id, error = %e, "failed to insert telemetry event");
            return Err(EntryResult::error(reading.node_id, e.to_string()));
        }

        Ok(Stored {
            reading,
            mapping,
            node,
            event_id,
            published,
            at: now,
        })
    }

    /// Fan-out, alert and geofence steps for a stored event. None of them
    /// can turn the entry into an error.
    async fn follow_up(&self, stored: Stored) -> EntryResult {
        let Stored {
            reading,
            mapping,
            node,
            event_id,
            published,
            at,
        } = stored;

        match published {
            Ok(payload) => {
                if let Err(e) = self.broadcaster.publish(topics::TELEMETRY, &payload).await {
                    tracing::warn!(node_id = %reading.node_id, error = %e, "telemetry broadcast failed");
                }
            }
            Err(e) => tracing::warn!(node_id = %reading.node_id, error = %e, "failed to encode telemetry event"),
        }

        let mut result = EntryResult::ok(reading.node_id.clone(), event_id);
        if let Some(alert_type) = reading.data.alert_type.filter(|_| reading.data.is_alerted) {
            let alert = Alert {
                id: AlertId(Ulid::new()),
                node_id: reading.node_id.clone(),
                base_id: reading.base_id.clone(),
                alert_type,
                source_event_id: Some(event_id),
                latitude: reading.data.latitude,
                longitude: reading.data.longitude,
                node_battery: reading.data.node_battery_percent,
                temperature: reading.data.temperature,
                sent: false,
                created_at: at,
            };
            let label = alert.label();

            match self.registries.alerts.insert_alert(alert).await {
                Ok(()) => tracing::info!(node_id = %reading.node_id, alert_type, label, "alert recorded"),
                Err(e) => {
                    tracing::warn!(node_id = %reading.node_id, error = %e, "event stored but alert insert failed");
                    result = EntryResult::partial(reading.node_id.clone(), event_id, e.to_string());
                }
            }
        }

        self.check_geofence(&reading, node.as_ref(), mapping).await;

        result
    }

    /// Creates or refreshes the node record. Failures are only logged.
    async fn reconcile_node(&self, reading: &Reading, mapping: FieldMapping) -> Option<Node> {
        let now = self.clock.now();
        let nodes = &self.registries.nodes;

        let existing = match nodes.get_node(&reading.node_id).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(node_id = %reading.node_id, error = %e, "node lookup failed");
                return None;
            }
        };

        if existing.is_some() {
            if reading.metadata.is_empty() {
                return existing;
            }
            return match nodes.update_node_metadata(&reading.node_id, &reading.metadata, now).await {
                Ok(updated) => updated,
                Err(e) => {
                    tracing::warn!(node_id = %reading.node_id, error = %e, "failed to update node metadata");
                    existing
                }
            };
        }

        let mut node = Node {
            id: reading.node_id.clone(),
            name: Some(mapping.placeholder_name(&reading.node_id).into_boxed_str()),
            tag_id: None,
            birth_date: None,
            breed: None,
            created_at: now,
            updated_at: now,
        };
        reading.metadata.apply_to(&mut node);

        match nodes.insert_node(node.clone()).await {
            Ok(()) => {
                tracing::info!(node_id = %node.id, "registered new node");
                Some(node)
            }
            Err(e) => {
                tracing::warn!(node_id = %reading.node_id, error = %e, "failed to insert node");
                None
            }
        }
    }

    async fn check_geofence(&self, reading: &Reading, node: Option<&Node>, mapping: FieldMapping) {
        let farm = reading
            .farm_id
            .clone()
            .or_else(|| self.settings.default_farm_id.clone());

        let inside = match self
            .geofence
            .is_inside(farm.as_ref(), reading.data.latitude, reading.data.longitude)
            .await
        {
            Ok(inside) => inside,
            Err(e) => {
                tracing::warn!(node_id = %reading.node_id, error = %e, "geofence check failed");
                return;
            }
        };

        if inside {
            return;
        }
        if !self.cooldown.should_notify(&reading.node_id) {
            tracing::debug!(node_id = %reading.node_id, "fence breach within cooldown, not notifying");
            return;
        }

        let name = node
            .map(|n| n.display_name().to_string())
            .or_else(|| reading.metadata.name.as_deref().map(str::to_string))
            .unwrap_or_else(|| mapping.placeholder_name(&reading.node_id));
        let body = format!("{name} left the pasture");

        let mut data = BTreeMap::from([("node_id".to_string(), reading.node_id.to_string())]);
        if let Some(farm) = &farm {
            data.insert("farm_id".to_string(), farm.to_string());
        }
        if let Some(lat) = reading.data.latitude {
            data.insert("latitude".to_string(), lat.to_string());
        }
        if let Some(lon) = reading.data.longitude {
            data.insert("longitude".to_string(), lon.to_string());
        }

        tracing::info!(node_id = %reading.node_id, "node outside every fence");
        if let Err(e) = self
            .push
            .send_to_topic(&self.settings.push_topic, &self.settings.push_title, &body, &data)
            .await
        {
            tracing::warn!(node_id = %reading.node_id, error = %e, "breach push notification failed");
        }

        let breach = FenceBreach {
            node_id: reading.node_id.clone(),
            farm_id: farm,
            phone: self.settings.breach_contact_phone.clone(),
        };
        if let Err(e) = self.orders.create_fence_breach_order(breach).await {
            tracing::warn!(node_id = %reading.node_id, error = %e, "failed to create fence breach order");
        }
    }
}
