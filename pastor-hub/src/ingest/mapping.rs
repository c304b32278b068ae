//! Normalization of raw firmware entries into [`Reading`]s.
//!
//! Collars in the field run several firmware generations that disagree on
//! key names. Each generation gets a [`FieldMapping`]; everything after
//! normalization is shared.

use std::fmt;

use pastor_core::{BaseId, EventData, EventType, FarmId, NodeId, NodeMetadata};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMapping {
    /// `{node_id, base_id, farm_id, event_type, event_data: {...}}`.
    Node,
    /// Legacy `{cow_id, ..., event_data: {temperature, ...}}`.
    Cow,
    /// Flat `{id, latitude, longitude, temperature, batteryVoltage, ...}`.
    /// Anomalies are derived rather than reported.
    Sensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnObject,
    MissingId(&'static str),
    InvalidEventData,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotAnObject => f.write_str("entry is not an object"),
            SkipReason::MissingId(field) => write!(f, "missing {field}"),
            SkipReason::InvalidEventData => f.write_str("invalid or missing event_data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub node_id: Option<NodeId>,
    pub reason: SkipReason,
}

/// One entry after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub node_id: NodeId,
    pub base_id: Option<BaseId>,
    pub farm_id: Option<FarmId>,
    /// Type reported by the device; `None` for plain or derived telemetry.
    pub event_type: Option<EventType>,
    pub metadata: NodeMetadata,
    pub data: EventData,
}

impl FieldMapping {
    pub fn id_field(self) -> &'static str {
        match self {
            FieldMapping::Node => "node_id",
            FieldMapping::Cow => "cow_id",
            FieldMapping::Sensor => "id",
        }
    }

    pub fn derives_anomalies(self) -> bool {
        matches!(self, FieldMapping::Sensor)
    }

    /// Name given to nodes first seen without one.
    pub fn placeholder_name(self, id: &NodeId) -> String {
        match self {
            FieldMapping::Cow => format!("ESPCOW_{id}"),
            FieldMapping::Node | FieldMapping::Sensor => format!("node_{id}"),
        }
    }

    /// The object holding the reading's measurements, if well-formed.
    pub fn payload(self, entry: &Value) -> Option<&Map<String, Value>> {
        match self {
            FieldMapping::Node | FieldMapping::Cow => entry.get("event_data")?.as_object(),
            FieldMapping::Sensor => entry.as_object(),
        }
    }

    pub fn normalize(self, entry: &Value) -> Result<Reading, Skipped> {
        let Some(obj) = entry.as_object() else {
            return Err(Skipped {
                node_id: None,
                reason: SkipReason::NotAnObject,
            });
        };

        let Some(node_id) = id(obj.get(self.id_field())) else {
            return Err(Skipped {
                node_id: None,
                reason: SkipReason::MissingId(self.id_field()),
            });
        };

        let Some(payload) = self.payload(entry) else {
            return Err(Skipped {
                node_id: Some(node_id),
                reason: SkipReason::InvalidEventData,
            });
        };

        let (data, event_type) = match self {
            FieldMapping::Node => (
                firmware_data(payload, &["node_temperature", "temperature"]),
                text(obj.get("event_type")).map(|t| EventType::from(t.into_string())),
            ),
            FieldMapping::Cow => (
                firmware_data(payload, &["temperature"]),
                text(obj.get("event_type")).map(|t| EventType::from(t.into_string())),
            ),
            FieldMapping::Sensor => (sensor_data(payload), None),
        };

        Ok(Reading {
            node_id,
            base_id: text(obj.get("base_id")).map(BaseId),
            farm_id: text(obj.get("farm_id")).map(FarmId),
            event_type,
            metadata: metadata(obj),
            data,
        })
    }
}

fn firmware_data(p: &Map<String, Value>, temperature_keys: &[&str]) -> EventData {
    let mut data = EventData {
        temperature: temperature_keys.iter().find_map(|k| number(p.get(*k))),

        node_battery: number(p.get("node_battery")),
        node_battery_percent: number(p.get("node_battery_percent")),
        node_vbus: number(p.get("node_vbus")),
        node_has_battery: boolean(p.get("node_has_battery")),

        base_battery: number(p.get("base_battery")),
        base_battery_percent: number(p.get("base_battery_percent")),
        base_vbus: number(p.get("base_vbus")),
        base_latitude: number(p.get("base_latitude")),
        base_longitude: number(p.get("base_longitude")),

        node_sat_count: number(p.get("node_satCount")),
        node_gps_fix: boolean(p.get("node_gpsFix")),
        node_gps_course: number(p.get("node_gpsCourse")),
        node_gps_altitude: number(p.get("node_gpsAltitude")),
        node_gps_speed: number(p.get("node_gpsSpeed")),

        operator_name: text(p.get("operatorName")),
        rat_name: text(p.get("ratName")),
        signal_percent: number(p.get("signalPercent")),
        lte_signal_quality: number(p.get("lteSignalQuality")),
        lora_rssi: number(p.get("lora_rssi")),
        lora_snr: number(p.get("lora_snr")),

        is_alerted: boolean(p.get("isAlerted")).unwrap_or(false),
        alert_type: integer(p.get("alertType")),

        ..Default::default()
    };
    data.set_position(number(p.get("latitude")), number(p.get("longitude")));
    data
}

fn sensor_data(p: &Map<String, Value>) -> EventData {
    let mut data = EventData {
        temperature: number(p.get("temperature")),
        node_battery: number(p.get("batteryVoltage")),
        node_battery_percent: number(p.get("batteryPercent")),
        base_battery: number(p.get("baseBatteryVoltage")),
        base_battery_percent: number(p.get("baseBatteryPercent")),
        ..Default::default()
    };
    data.set_position(number(p.get("latitude")), number(p.get("longitude")));
    data
}

fn metadata(obj: &Map<String, Value>) -> NodeMetadata {
    NodeMetadata {
        name: text(obj.get("name")),
        tag_id: text(obj.get("tag_id")),
        birth_date: text(obj.get("birth_date")).and_then(|d| d.parse().ok()),
        breed: text(obj.get("breed")),
    }
}

fn id(v: Option<&Value>) -> Option<NodeId> {
    text(v).map(NodeId)
}

/// Finite numbers, from JSON numbers or numeric strings.
fn number(v: Option<&Value>) -> Option<f64> {
    let n = match v? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn integer(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn boolean(v: Option<&Value>) -> Option<bool> {
    match v? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Non-blank strings; numbers are accepted and stringified.
fn text(v: Option<&Value>) -> Option<Box<str>> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().into()),
        Value::Number(n) => Some(n.to_string().into_boxed_str()),
        _ => None,
    }
}
