pub mod alert;
pub mod geo;

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::geo::{GeoPoint, Polygon};

type BoxStr = Box<str>;

/// Identifier reported by a tracking collar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub BoxStr);

/// Identifier of the base station that relayed a reading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaseId(pub BoxStr);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FarmId(pub BoxStr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FenceId(pub Ulid);

macro_rules! display_inner {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        })*
    };
}

display_inner!(NodeId, BaseId, FarmId, EventId, AlertId, OrderId, FenceId);

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<&str> for BaseId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<&str> for FarmId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

/// A tracked animal's collar. Created on first report, never deleted by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: Option<BoxStr>,
    pub tag_id: Option<BoxStr>,
    pub birth_date: Option<jiff::civil::Date>,
    pub breed: Option<BoxStr>,
    pub created_at: jiff::Timestamp,
    pub updated_at: jiff::Timestamp,
}

impl Node {
    /// Name used in notifications: display name when known, id otherwise.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id.0)
    }
}

/// Mutable node fields carried by telemetry. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub name: Option<BoxStr>,
    pub tag_id: Option<BoxStr>,
    pub birth_date: Option<jiff::civil::Date>,
    pub breed: Option<BoxStr>,
}

impl NodeMetadata {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.tag_id.is_none()
            && self.birth_date.is_none()
            && self.breed.is_none()
    }

    /// Overwrites the fields of `node` that this metadata carries.
    pub fn apply_to(&self, node: &mut Node) {
        if let Some(name) = &self.name {
            node.name = Some(name.clone());
        }
        if let Some(tag_id) = &self.tag_id {
            node.tag_id = Some(tag_id.clone());
        }
        if let Some(birth_date) = self.birth_date {
            node.birth_date = Some(birth_date);
        }
        if let Some(breed) = &self.breed {
            node.breed = Some(breed.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Telemetry,
    /// Derived: the node moved since its previous event.
    Location,
    /// Derived: body temperature outside the normal range.
    Temperature,
    Other(BoxStr),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Telemetry => "telemetry",
            EventType::Location => "location",
            EventType::Temperature => "temperature",
            EventType::Other(s) => &**s,
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "telemetry" => EventType::Telemetry,
            "location" => EventType::Location,
            "temperature" => EventType::Temperature,
            _ => EventType::Other(s.into_boxed_str()),
        }
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical shape of a telemetry payload, whatever the firmware sent.
///
/// `latitude` and `longitude` are either both present or both absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub temperature: Option<f64>,

    pub node_battery: Option<f64>,
    pub node_battery_percent: Option<f64>,
    pub node_vbus: Option<f64>,
    pub node_has_battery: Option<bool>,

    pub base_battery: Option<f64>,
    pub base_battery_percent: Option<f64>,
    pub base_vbus: Option<f64>,
    pub base_latitude: Option<f64>,
    pub base_longitude: Option<f64>,

    pub node_sat_count: Option<f64>,
    pub node_gps_fix: Option<bool>,
    pub node_gps_course: Option<f64>,
    pub node_gps_altitude: Option<f64>,
    pub node_gps_speed: Option<f64>,

    pub operator_name: Option<BoxStr>,
    pub rat_name: Option<BoxStr>,
    pub signal_percent: Option<f64>,
    pub lte_signal_quality: Option<f64>,
    pub lora_rssi: Option<f64>,
    pub lora_snr: Option<f64>,

    pub is_alerted: bool,
    pub alert_type: Option<i64>,
}

impl EventData {
    pub fn position(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }

    /// Sets both coordinates, or clears both when either is missing or non-finite.
    pub fn set_position(&mut self, lat: Option<f64>, lon: Option<f64>) {
        match (lat, lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
                self.latitude = Some(lat);
                self.longitude = Some(lon);
            }
            _ => {
                self.latitude = None;
                self.longitude = None;
            }
        }
    }
}

/// Immutable, append-only record of one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: EventId,
    pub node_id: NodeId,
    pub base_id: Option<BaseId>,
    pub event_type: EventType,
    pub event_data: EventData,
    pub created_at: jiff::Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub node_id: NodeId,
    pub base_id: Option<BaseId>,
    #[serde(rename = "type")]
    pub alert_type: i64,
    pub source_event_id: Option<EventId>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub node_battery: Option<f64>,
    pub temperature: Option<f64>,
    pub sent: bool,
    pub created_at: jiff::Timestamp,
}

impl Alert {
    pub fn label(&self) -> &'static str {
        alert::label_for(self.alert_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderKind {
    FenceBreach,
    Other(BoxStr),
}

impl OrderKind {
    pub fn as_str(&self) -> &str {
        match self {
            OrderKind::FenceBreach => "fenceBreach",
            OrderKind::Other(s) => &**s,
        }
    }
}

impl From<String> for OrderKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "fenceBreach" => OrderKind::FenceBreach,
            _ => OrderKind::Other(s.into_boxed_str()),
        }
    }
}

impl From<OrderKind> for String {
    fn from(k: OrderKind) -> Self {
        k.as_str().to_string()
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "processed" => Some(OrderStatus::Processed),
            _ => None,
        }
    }
}

/// Outstanding dispatch command awaiting external action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    /// Node referenced by `payload.device_id`, if any.
    pub node_id: Option<NodeId>,
    pub payload: serde_json::Value,
    pub status: OrderStatus,
    pub created_at: jiff::Timestamp,
    pub processed_at: Option<jiff::Timestamp>,
}

/// Named polygon scoped to a farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fence {
    pub id: FenceId,
    pub farm_id: FarmId,
    pub name: BoxStr,
    pub geometry: Polygon,
    pub props: serde_json::Value,
    pub version: u32,
    pub created_at: jiff::Timestamp,
    pub updated_at: jiff::Timestamp,
}

/// A fence containing a queried point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FenceHit {
    pub fence_id: FenceId,
    pub name: BoxStr,
}

/// Closest fence to a point lying outside every fence of a farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestFence {
    pub fence_id: FenceId,
    pub name: BoxStr,
    pub distance_m: f64,
}
