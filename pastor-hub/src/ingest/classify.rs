use std::ops::RangeInclusive;
use std::time::Duration;

use jiff::Timestamp;
use pastor_core::{EventData, EventType, TelemetryEvent, geo};

use crate::clock::elapsed_ms;

/// Derives an event type for readings whose firmware does not flag anomalies.
#[derive(Debug, Clone)]
pub struct AnomalyClassifier {
    /// Displacement that counts as movement, strictly exceeded.
    pub movement_threshold_m: f64,
    /// Minimum time since the previous event before movement is reported.
    pub min_movement_interval: Duration,
    /// Body temperature range considered healthy, in °C.
    pub normal_temperature: RangeInclusive<f64>,
}

impl Default for AnomalyClassifier {
    fn default() -> Self {
        Self {
            movement_threshold_m: 10.0,
            min_movement_interval: Duration::from_secs(15 * 60),
            normal_temperature: 36.0..=39.0,
        }
    }
}

impl AnomalyClassifier {
    pub fn is_abnormal_temperature(&self, temperature: Option<f64>) -> bool {
        temperature.is_some_and(|t| t.is_finite() && !self.normal_temperature.contains(&t))
    }

    pub fn has_moved(&self, current: &EventData, at: Timestamp, last: Option<&TelemetryEvent>) -> bool {
        let (Some(here), Some(last)) = (current.position(), last) else {
            return false;
        };
        let Some(there) = last.event_data.position() else {
            return false;
        };

        let meters = geo::distance(here.lat, here.lon, there.lat, there.lon);
        if meters.is_nan() || meters <= self.movement_threshold_m {
            return false;
        }

        let min_ms = i64::try_from(self.min_movement_interval.as_millis()).unwrap_or(i64::MAX);
        elapsed_ms(last.created_at, at) >= min_ms
    }

    /// Temperature wins over movement; otherwise plain telemetry.
    pub fn classify(&self, current: &EventData, at: Timestamp, last: Option<&TelemetryEvent>) -> EventType {
        if self.is_abnormal_temperature(current.temperature) {
            EventType::Temperature
        } else if self.has_moved(current, at, last) {
            EventType::Location
        } else {
            EventType::Telemetry
        }
    }
}
