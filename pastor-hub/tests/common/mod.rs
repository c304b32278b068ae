#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use pastor_core::{
    Alert, FarmId, Fence, FenceHit, FenceId, NearestFence, Node, NodeId, NodeMetadata,
    TelemetryEvent,
    geo::{GeoPoint, Polygon},
};
use pastor_hub::{
    broadcast::{BroadcastError, Broadcaster},
    clock::ManualClock,
    cooldown::CooldownMode,
    ingest::{IngestSettings, Ingestor},
    notify::{PushError, PushGateway},
    registry::{
        AlertRegistry, EventRegistry, FenceRegistry, FenceUpsert, NodeRegistry, Registries,
        RegistryError, filter::AlertFilter,
    },
};
use serde_json::{Value, json};

pub const FARM: &str = "farm-1";

/// Fence centre; the fence spans 0.01° in every direction.
pub const CENTRE: (f64, f64) = (40.0, -8.0);

/// Well outside the fence (roughly 5.5 km north).
pub const OUTSIDE: (f64, f64) = (40.05, -8.0);

#[derive(Default)]
pub struct RecordingBroadcaster {
    pub published: Mutex<Vec<(String, Value)>>,
}

impl RecordingBroadcaster {
    pub fn topics(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BroadcastError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentPush {
    pub topic: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct RecordingPush {
    pub sent: Mutex<Vec<SentPush>>,
}

impl RecordingPush {
    pub fn sent(&self) -> Vec<SentPush> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushGateway for RecordingPush {
    async fn send_to_topic(
        &self,
        topic: &str,
        title: &str,
        body: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), PushError> {
        self.sent.lock().unwrap().push(SentPush {
            topic: topic.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            data: data.clone(),
        });
        Ok(())
    }
}

/// Event store that rejects every write.
pub struct FailingEvents;

#[async_trait]
impl EventRegistry for FailingEvents {
    async fn insert_event(&self, _event: TelemetryEvent) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable("event store offline".to_string()))
    }

    async fn latest_event(&self, _node: &NodeId) -> Result<Option<TelemetryEvent>, RegistryError> {
        Ok(None)
    }

    async fn list_events(
        &self,
        _node: &NodeId,
        _limit: Option<usize>,
    ) -> Result<Vec<TelemetryEvent>, RegistryError> {
        Ok(Vec::new())
    }
}

/// Alert store that rejects every write.
pub struct FailingAlerts;

#[async_trait]
impl AlertRegistry for FailingAlerts {
    async fn insert_alert(&self, _alert: Alert) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable("alert store offline".to_string()))
    }

    async fn list_alerts(&self, _filter: AlertFilter) -> Result<Vec<Alert>, RegistryError> {
        Ok(Vec::new())
    }

    async fn mark_alert_sent(&self, _id: pastor_core::AlertId) -> Result<Option<Alert>, RegistryError> {
        Ok(None)
    }
}

/// Push gateway that takes `delay` before recording each notification.
pub struct SlowPush {
    pub delay: Duration,
    pub inner: RecordingPush,
}

impl SlowPush {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: RecordingPush::default(),
        }
    }
}

#[async_trait]
impl PushGateway for SlowPush {
    async fn send_to_topic(
        &self,
        topic: &str,
        title: &str,
        body: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), PushError> {
        tokio::time::sleep(self.delay).await;
        self.inner.send_to_topic(topic, title, body, data).await
    }
}

/// Node store where every call fails, or hangs for `stall` first when set.
#[derive(Default)]
pub struct FailingNodes {
    pub stall: Option<Duration>,
}

impl FailingNodes {
    async fn fail<T>(&self) -> Result<T, RegistryError> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        Err(RegistryError::Unavailable("node store offline".to_string()))
    }
}

#[async_trait]
impl NodeRegistry for FailingNodes {
    async fn get_node(&self, _id: &NodeId) -> Result<Option<Node>, RegistryError> {
        self.fail().await
    }

    async fn insert_node(&self, _node: Node) -> Result<(), RegistryError> {
        self.fail().await
    }

    async fn update_node_metadata(
        &self,
        _id: &NodeId,
        _metadata: &NodeMetadata,
        _at: Timestamp,
    ) -> Result<Option<Node>, RegistryError> {
        self.fail().await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, RegistryError> {
        self.fail().await
    }
}

/// Fence store whose spatial queries fail.
pub struct FailingFences;

#[async_trait]
impl FenceRegistry for FailingFences {
    async fn list_fences(&self, _farm: Option<&FarmId>) -> Result<Vec<Fence>, RegistryError> {
        Ok(Vec::new())
    }

    async fn get_fence(&self, _id: FenceId) -> Result<Option<Fence>, RegistryError> {
        Ok(None)
    }

    async fn upsert_fence(&self, _fence: FenceUpsert, _at: Timestamp) -> Result<Fence, RegistryError> {
        Err(RegistryError::Unavailable("fence store offline".to_string()))
    }

    async fn delete_fence(&self, _id: FenceId) -> Result<bool, RegistryError> {
        Ok(false)
    }

    async fn fences_containing(
        &self,
        _farm: &FarmId,
        _point: GeoPoint,
    ) -> Result<Vec<FenceHit>, RegistryError> {
        Err(RegistryError::Unavailable("spatial service offline".to_string()))
    }

    async fn nearest_fence(
        &self,
        _farm: &FarmId,
        _point: GeoPoint,
    ) -> Result<Option<NearestFence>, RegistryError> {
        Err(RegistryError::Unavailable("spatial service offline".to_string()))
    }
}

pub fn start() -> Timestamp {
    "2025-03-01T08:00:00Z".parse().unwrap()
}

pub fn square(lat: f64, lon: f64, half: f64) -> Polygon {
    Polygon::from_lat_lon(&[
        [lat - half, lon - half],
        [lat - half, lon + half],
        [lat + half, lon + half],
        [lat + half, lon - half],
    ])
    .unwrap()
}

pub fn pasture(farm: &str, name: &str) -> FenceUpsert {
    FenceUpsert {
        id: None,
        farm_id: FarmId::from(farm),
        name: name.into(),
        geometry: square(CENTRE.0, CENTRE.1, 0.01),
        props: json!({}),
        version: None,
    }
}

pub async fn add_pasture(registries: &Registries) -> Fence {
    registries
        .fences
        .upsert_fence(pasture(FARM, "North pasture"), start())
        .await
        .unwrap()
}

/// Node-firmware entry at `(lat, lon)` for [`FARM`].
pub fn node_entry(node_id: &str, (lat, lon): (f64, f64)) -> Value {
    json!({
        "node_id": node_id,
        "base_id": "base-1",
        "farm_id": FARM,
        "event_data": {
            "latitude": lat,
            "longitude": lon,
            "node_temperature": 38.2,
            "node_battery_percent": 87,
            "isAlerted": false,
        },
    })
}

pub struct Harness {
    pub ingestor: Ingestor,
    pub registries: Registries,
    pub clock: Arc<ManualClock>,
    pub push: Arc<RecordingPush>,
    pub broadcaster: Arc<RecordingBroadcaster>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registries(Registries::memory(), CooldownMode::Enforce)
    }

    pub fn with_registries(registries: Registries, cooldown: CooldownMode) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let push = Arc::new(RecordingPush::default());
        let broadcaster = Arc::new(RecordingBroadcaster::default());

        let ingestor = Ingestor::builder(registries.clone())
            .clock(clock.clone())
            .push(push.clone())
            .broadcaster(broadcaster.clone())
            .cooldown(cooldown, Duration::from_secs(600))
            .dedupe_window(Duration::from_secs(600))
            .settings(IngestSettings {
                breach_contact_phone: Some("+351000000000".to_string()),
                ..Default::default()
            })
            .build();

        Self {
            ingestor,
            registries,
            clock,
            push,
            broadcaster,
        }
    }
}
