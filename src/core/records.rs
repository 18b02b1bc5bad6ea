//! Persisted tracking records: device events and learning samples

use crate::core::{Error, Phase, PowerEvent, PowerEventType, Result};
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Events lasting longer than this with a steady delta count as stabilized (ms)
const STABILIZATION_MIN_DURATION: i64 = 300_000;
/// Start/end delta difference below which the load is considered steady (W)
const STABILIZATION_MAX_DIFF: f64 = 50.0;
/// Upper bound reported for the turn-on phase of an event (ms)
const MAX_TURN_ON_DURATION: i64 = 30_000;

/// Local wall-clock time for a millisecond timestamp
pub fn local_time(timestamp: i64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(timestamp).single()
}

/// What the user (or the auto-recorder) says the device was doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEventType {
    #[default]
    Usage,
    Standby,
    Peak,
    ManualStart,
}

impl DeviceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceEventType::Usage => "usage",
            DeviceEventType::Standby => "standby",
            DeviceEventType::Peak => "peak",
            DeviceEventType::ManualStart => "manual_start",
        }
    }
}

/// Who created a device event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    #[default]
    Manual,
    ManualStart,
    Auto,
}

impl EventSource {
    pub fn is_manual(&self) -> bool {
        matches!(self, EventSource::Manual | EventSource::ManualStart)
    }
}

/// Power-factor summary over a start/end pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerEfficiency {
    pub average_power_factor: f64,
    pub power_factor_stability: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAnalysis {
    #[serde(default)]
    pub turn_on_duration: Option<i64>,
    #[serde(default)]
    pub stabilization_detected: bool,
    #[serde(default)]
    pub power_efficiency: Option<PowerEfficiency>,
}

/// A device activation attributed by the user or the auto-recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub id: String,
    /// Id of the power event that started this activation
    #[serde(default)]
    pub event_id: Option<String>,
    pub device_id: String,
    #[serde(default)]
    pub event_type: DeviceEventType,
    #[serde(default)]
    pub trigger_type: PowerEventType,
    pub start_time: i64,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub duration: Option<i64>,
    pub phase: Phase,
    pub start_power_delta: f64,
    #[serde(default)]
    pub end_power_delta: Option<f64>,
    #[serde(default)]
    pub peak_power: f64,
    #[serde(default)]
    pub average_power: f64,
    /// Wh
    #[serde(default)]
    pub total_consumption: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source: EventSource,
    #[serde(default)]
    pub start_readings: HashMap<String, f64>,
    #[serde(default)]
    pub end_readings: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub pattern_analysis: PatternAnalysis,
}

fn default_confidence() -> f64 { 1.0 }

impl DeviceEvent {
    /// Check the power events a device event would be built from. Both must
    /// be valid, and a closing event must follow the start on the same phase.
    pub fn validate_span(start: &PowerEvent, end: Option<&PowerEvent>) -> Result<()> {
        start.validate()?;
        let Some(end) = end else {
            return Ok(());
        };
        end.validate()?;

        if end.phase != start.phase {
            return Err(Error::InvalidInput(format!(
                "end event is on phase {}, start on phase {}",
                end.phase, start.phase
            )));
        }
        if end.timestamp < start.timestamp {
            return Err(Error::InvalidInput(format!(
                "end event ({}) precedes start event ({})",
                end.timestamp, start.timestamp
            )));
        }
        Ok(())
    }

    /// Build a device event from the power event that started it and, when
    /// known, the one that ended it
    pub fn from_power_events(
        device_id: &str,
        start: &PowerEvent,
        end: Option<&PowerEvent>,
        event_type: DeviceEventType,
        source: EventSource,
        confidence: f64,
    ) -> Self {
        let start_delta = start.power_delta.abs();
        let end_delta = end.map(|e| e.power_delta.abs());

        let (peak_power, average_power) = match end_delta {
            Some(end_delta) => (start_delta.max(end_delta), (start_delta + end_delta) / 2.0),
            None => (start_delta, start_delta),
        };

        let duration = end.map(|e| e.timestamp - start.timestamp);
        let total_consumption = match duration {
            Some(ms) => average_power * (ms as f64 / 3_600_000.0),
            None => 0.0,
        };

        let stabilization_detected = match (duration, end_delta) {
            (Some(ms), Some(end_delta)) => {
                ms > STABILIZATION_MIN_DURATION && (start_delta - end_delta).abs() < STABILIZATION_MAX_DIFF
            }
            _ => false,
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: start.id.clone(),
            device_id: device_id.to_string(),
            event_type,
            trigger_type: start.event_type,
            start_time: start.timestamp,
            end_time: end.map(|e| e.timestamp),
            duration,
            phase: start.phase,
            start_power_delta: start.power_delta,
            end_power_delta: end.map(|e| e.power_delta),
            peak_power,
            average_power,
            total_consumption,
            confidence,
            source,
            start_readings: start.readings.clone(),
            end_readings: end.map(|e| e.readings.clone()),
            pattern_analysis: PatternAnalysis {
                turn_on_duration: duration.map(|ms| ms.min(MAX_TURN_ON_DURATION)),
                stabilization_detected,
                power_efficiency: power_efficiency(start, end),
            },
        }
    }
}

fn power_efficiency(start: &PowerEvent, end: Option<&PowerEvent>) -> Option<PowerEfficiency> {
    let end = end?;
    if start.readings.is_empty() || end.readings.is_empty() {
        return None;
    }

    let start_pf = start.phase_reading("pf").unwrap_or(0.0);
    let end_pf = end.phase_reading("pf").unwrap_or(start_pf);
    Some(PowerEfficiency {
        average_power_factor: (start_pf + end_pf) / 2.0,
        power_factor_stability: (start_pf - end_pf).abs() < 0.1,
    })
}

/// Single-event association from the older export format
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAssociation {
    #[serde(default)]
    pub id: Option<String>,
    pub timestamp: i64,
    pub phase: Phase,
    #[serde(rename = "type")]
    pub event_type: PowerEventType,
    pub power_delta: f64,
    pub device_id: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source: EventSource,
    #[serde(default)]
    pub readings: HashMap<String, f64>,
}

impl LegacyAssociation {
    /// Convert to an open-ended device event
    pub fn into_device_event(self) -> DeviceEvent {
        let start = PowerEvent::new(self.event_type, self.phase, self.power_delta, 0.0, self.timestamp)
            .with_readings(self.readings);
        let mut event = DeviceEvent::from_power_events(
            &self.device_id,
            &start,
            None,
            DeviceEventType::Usage,
            self.source,
            self.confidence,
        );
        if let Some(id) = self.id {
            event.id = id;
        }
        event
    }
}

/// Coarse part of the day used as a learning feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Afternoon,
            18..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }
}

/// Features extracted from a power event for model training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningFeatures {
    pub power_delta: f64,
    pub phase: Phase,
    #[serde(rename = "type")]
    pub event_type: PowerEventType,
    #[serde(default)]
    pub voltage: Option<f64>,
    #[serde(default)]
    pub current: Option<f64>,
    #[serde(default)]
    pub power_factor: Option<f64>,
    pub hour: u32,
    /// 0 = Sunday
    pub day_of_week: u32,
    pub is_weekend: bool,
    pub time_of_day: TimeOfDay,
}

impl LearningFeatures {
    pub fn extract(event: &PowerEvent) -> Self {
        let (hour, day_of_week) = local_time(event.timestamp)
            .map(|t| (t.hour(), t.weekday().num_days_from_sunday()))
            .unwrap_or((0, 0));

        Self {
            power_delta: event.power_delta,
            phase: event.phase,
            event_type: event.event_type,
            voltage: event.phase_reading("voltage"),
            current: event.phase_reading("current"),
            power_factor: event.phase_reading("pf"),
            hour,
            day_of_week,
            is_weekend: day_of_week == 0 || day_of_week == 6,
            time_of_day: TimeOfDay::from_hour(hour),
        }
    }
}

/// One labeled example kept for the learning-model hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSample {
    pub device_id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    pub phase: Phase,
    #[serde(rename = "type")]
    pub event_type: PowerEventType,
    pub power_delta: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub source: EventSource,
    pub features: LearningFeatures,
}

impl LearningSample {
    pub fn new(device_id: &str, event: &PowerEvent, source: EventSource) -> Self {
        Self {
            device_id: device_id.to_string(),
            event_id: event.id.clone(),
            phase: event.phase,
            event_type: event.event_type,
            power_delta: event.power_delta,
            timestamp: event.timestamp,
            source,
            features: LearningFeatures::extract(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn readings(phase_pf: f64) -> HashMap<String, f64> {
        let mut map = HashMap::new();
        map.insert("pf_a".to_string(), phase_pf);
        map.insert("voltage_a".to_string(), 230.0);
        map
    }

    #[test]
    fn test_span_rejects_bad_inputs() {
        let start = PowerEvent::new(PowerEventType::Peak, Phase::A, 1450.0, 1500.0, T0);
        let nan = PowerEvent::new(PowerEventType::Peak, Phase::A, f64::NAN, 1500.0, T0);
        let earlier = PowerEvent::new(PowerEventType::Valley, Phase::A, -1450.0, 50.0, T0 - 600_000);
        let other_phase = PowerEvent::new(PowerEventType::Valley, Phase::B, -1450.0, 50.0, T0 + 600_000);
        let later = PowerEvent::new(PowerEventType::Valley, Phase::A, -1450.0, 50.0, T0 + 600_000);

        assert!(DeviceEvent::validate_span(&start, None).is_ok());
        assert!(DeviceEvent::validate_span(&start, Some(&later)).is_ok());
        assert!(matches!(DeviceEvent::validate_span(&nan, None), Err(Error::InvalidInput(_))));
        assert!(matches!(DeviceEvent::validate_span(&start, Some(&nan)), Err(Error::InvalidInput(_))));
        assert!(matches!(DeviceEvent::validate_span(&start, Some(&earlier)), Err(Error::InvalidInput(_))));
        assert!(matches!(DeviceEvent::validate_span(&start, Some(&other_phase)), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_open_event_has_no_consumption() {
        let start = PowerEvent::new(PowerEventType::Peak, Phase::A, 1450.0, 1500.0, T0);
        let event = DeviceEvent::from_power_events("ac", &start, None, DeviceEventType::Usage, EventSource::Manual, 1.0);

        assert_eq!(event.duration, None);
        assert_eq!(event.end_time, None);
        assert_eq!(event.total_consumption, 0.0);
        assert_eq!(event.peak_power, 1450.0);
        assert_eq!(event.average_power, 1450.0);
        assert_eq!(event.pattern_analysis.turn_on_duration, None);
        assert!(!event.pattern_analysis.stabilization_detected);
        assert!(event.pattern_analysis.power_efficiency.is_none());
    }

    #[test]
    fn test_closed_event_consumption() {
        let start = PowerEvent::new(PowerEventType::Peak, Phase::A, 1450.0, 1500.0, T0)
            .with_id("evt-1")
            .with_readings(readings(0.92));
        let end = PowerEvent::new(PowerEventType::Valley, Phase::A, -1430.0, 70.0, T0 + 600_000)
            .with_readings(readings(0.88));

        let event =
            DeviceEvent::from_power_events("ac", &start, Some(&end), DeviceEventType::Usage, EventSource::Manual, 1.0);

        assert_eq!(event.event_id.as_deref(), Some("evt-1"));
        assert_eq!(event.duration, Some(600_000));
        assert_eq!(event.peak_power, 1450.0);
        assert_eq!(event.average_power, 1440.0);
        assert!((event.total_consumption - 240.0).abs() < 1e-9);
        assert_eq!(event.pattern_analysis.turn_on_duration, Some(30_000));
        assert!(event.pattern_analysis.stabilization_detected);

        let efficiency = event.pattern_analysis.power_efficiency.unwrap();
        assert!((efficiency.average_power_factor - 0.90).abs() < 1e-9);
        assert!(efficiency.power_factor_stability);
    }

    #[test]
    fn test_short_event_not_stabilized() {
        let start = PowerEvent::new(PowerEventType::Peak, Phase::B, 300.0, 300.0, T0);
        let end = PowerEvent::new(PowerEventType::Valley, Phase::B, -290.0, 10.0, T0 + 20_000);
        let event =
            DeviceEvent::from_power_events("pc", &start, Some(&end), DeviceEventType::Usage, EventSource::Auto, 0.8);

        assert!(!event.pattern_analysis.stabilization_detected);
        assert_eq!(event.pattern_analysis.turn_on_duration, Some(20_000));
    }

    #[test]
    fn test_time_of_day_buckets() {
        assert_eq!(TimeOfDay::from_hour(5), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(6), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(12), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(21), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(22), TimeOfDay::Night);
    }

    #[test]
    fn test_learning_features_read_phase_keys() {
        let event = PowerEvent::new(PowerEventType::Peak, Phase::A, 500.0, 600.0, T0).with_readings(readings(0.9));
        let features = LearningFeatures::extract(&event);

        assert_eq!(features.voltage, Some(230.0));
        assert_eq!(features.power_factor, Some(0.9));
        assert_eq!(features.current, None);
        assert_eq!(features.is_weekend, features.day_of_week == 0 || features.day_of_week == 6);
    }

    #[test]
    fn test_legacy_association_conversion() {
        let legacy: LegacyAssociation = serde_json::from_str(
            r#"{"id":"1700000000000","timestamp":1700000000000,"phase":"C","type":"valley",
                "powerDelta":-80,"deviceId":"lamp","confidence":1.0,"source":"manual","readings":{}}"#,
        )
        .unwrap();

        let event = legacy.into_device_event();
        assert_eq!(event.id, "1700000000000");
        assert_eq!(event.trigger_type, PowerEventType::Valley);
        assert_eq!(event.peak_power, 80.0);
        assert_eq!(event.total_consumption, 0.0);
    }

    #[test]
    fn test_device_event_defaults_on_deserialize() {
        let event: DeviceEvent = serde_json::from_str(
            r#"{"id":"x","deviceId":"pc","startTime":1,"phase":"A","startPowerDelta":120}"#,
        )
        .unwrap();

        assert_eq!(event.source, EventSource::Manual);
        assert_eq!(event.trigger_type, PowerEventType::Peak);
        assert_eq!(event.confidence, 1.0);
    }
}
