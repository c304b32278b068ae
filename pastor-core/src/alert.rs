use serde::{Deserialize, Serialize};

/// Alert codes raised by collar firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    LowBattery,
    NoGpsFix,
    DeviceDisconnected,
    ChargingAnomaly,
    SensorFailure,
    UnusualMovement,
    ProlongedInactivity,
    GeofenceBreach,
    CalvingDetected,
    AggressionEvent,
    PossibleDeath,
    FallDetected,
    TemperatureCritical,
    ViolentBehaviorAlert,
}

pub const UNKNOWN_ALERT: &str = "UNKNOWN_ALERT";

impl AlertKind {
    pub fn from_code(code: i64) -> Option<Self> {
        let kind = match code {
            1 => AlertKind::LowBattery,
            2 => AlertKind::NoGpsFix,
            3 => AlertKind::DeviceDisconnected,
            4 => AlertKind::ChargingAnomaly,
            5 => AlertKind::SensorFailure,
            10 => AlertKind::UnusualMovement,
            11 => AlertKind::ProlongedInactivity,
            12 => AlertKind::GeofenceBreach,
            13 => AlertKind::CalvingDetected,
            14 => AlertKind::AggressionEvent,
            50 => AlertKind::PossibleDeath,
            51 => AlertKind::FallDetected,
            52 => AlertKind::TemperatureCritical,
            53 => AlertKind::ViolentBehaviorAlert,
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(&self) -> i64 {
        match self {
            AlertKind::LowBattery => 1,
            AlertKind::NoGpsFix => 2,
            AlertKind::DeviceDisconnected => 3,
            AlertKind::ChargingAnomaly => 4,
            AlertKind::SensorFailure => 5,
            AlertKind::UnusualMovement => 10,
            AlertKind::ProlongedInactivity => 11,
            AlertKind::GeofenceBreach => 12,
            AlertKind::CalvingDetected => 13,
            AlertKind::AggressionEvent => 14,
            AlertKind::PossibleDeath => 50,
            AlertKind::FallDetected => 51,
            AlertKind::TemperatureCritical => 52,
            AlertKind::ViolentBehaviorAlert => 53,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::LowBattery => "LOW_BATTERY",
            AlertKind::NoGpsFix => "NO_GPS_FIX",
            AlertKind::DeviceDisconnected => "DEVICE_DISCONNECTED",
            AlertKind::ChargingAnomaly => "CHARGING_ANOMALY",
            AlertKind::SensorFailure => "SENSOR_FAILURE",
            AlertKind::UnusualMovement => "UNUSUAL_MOVEMENT",
            AlertKind::ProlongedInactivity => "PROLONGED_INACTIVITY",
            AlertKind::GeofenceBreach => "GEOFENCE_BREACH",
            AlertKind::CalvingDetected => "CALVING_DETECTED",
            AlertKind::AggressionEvent => "AGGRESSION_EVENT",
            AlertKind::PossibleDeath => "POSSIBLE_DEATH",
            AlertKind::FallDetected => "FALL_DETECTED",
            AlertKind::TemperatureCritical => "TEMPERATURE_CRITICAL",
            AlertKind::ViolentBehaviorAlert => "VIOLENT_BEHAVIOR_ALERT",
        }
    }
}

/// Label for any alert code; unknown codes map to `UNKNOWN_ALERT`.
pub fn label_for(code: i64) -> &'static str {
    AlertKind::from_code(code).map_or(UNKNOWN_ALERT, |k| k.label())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_unknown_codes() {
        assert_eq!(label_for(52), "TEMPERATURE_CRITICAL");
        assert_eq!(label_for(1), "LOW_BATTERY");
        assert_eq!(label_for(12), "GEOFENCE_BREACH");
        assert_eq!(label_for(999), UNKNOWN_ALERT);
        assert_eq!(label_for(-1), UNKNOWN_ALERT);
        assert_eq!(label_for(0), UNKNOWN_ALERT);
    }

    #[test]
    fn codes_round_trip() {
        for code in [1, 2, 3, 4, 5, 10, 11, 12, 13, 14, 50, 51, 52, 53] {
            let kind = AlertKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
    }

    #[test]
    fn serde_label_matches_label() {
        let json = serde_json::to_value(AlertKind::ViolentBehaviorAlert).unwrap();
        assert_eq!(json, serde_json::json!(AlertKind::ViolentBehaviorAlert.label()));
    }
}
