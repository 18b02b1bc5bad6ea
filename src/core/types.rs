//! Common types shared by the detector, the inference engine and the store

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One of the three metered electrical legs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    A,
    B,
    C,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::A, Phase::B, Phase::C];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
        }
    }

    /// Lowercase suffix used by raw reading keys (`pf_a`, `voltage_b`, ...)
    pub fn key_suffix(&self) -> &'static str {
        match self {
            Phase::A => "a",
            Phase::B => "b",
            Phase::C => "c",
        }
    }

    /// Raw reading key for a measurement on this phase
    pub fn reading_key(&self, measurement: &str) -> String {
        format!("{}_{}", measurement, self.key_suffix())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single per-phase power sample from the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub phase: Phase,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Active power in watts
    pub power: f64,
    #[serde(default)]
    pub raw_readings: HashMap<String, f64>,
}

impl Sample {
    pub fn new(phase: Phase, timestamp: i64, power: f64) -> Self {
        Self {
            phase,
            timestamp,
            power,
            raw_readings: HashMap::new(),
        }
    }

    pub fn with_readings(mut self, readings: HashMap<String, f64>) -> Self {
        self.raw_readings = readings;
        self
    }
}

/// Kind of momentary transition detected in the sample stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerEventType {
    #[default]
    Peak,
    Valley,
    Start,
}

impl PowerEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerEventType::Peak => "peak",
            PowerEventType::Valley => "valley",
            PowerEventType::Start => "start",
        }
    }

    /// Event type that would close a transition of this type
    pub fn complementary(&self) -> PowerEventType {
        match self {
            PowerEventType::Peak => PowerEventType::Valley,
            PowerEventType::Valley | PowerEventType::Start => PowerEventType::Peak,
        }
    }

    /// Peaks and manual starts are compared against a device's peak power
    pub fn is_rising(&self) -> bool {
        matches!(self, PowerEventType::Peak | PowerEventType::Start)
    }
}

impl fmt::Display for PowerEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected transition, the input to device inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerEvent {
    /// Upstream identifier, when the producer assigns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: PowerEventType,
    pub phase: Phase,
    /// Signed change in power (W)
    pub power_delta: f64,
    /// Power level after the transition (W)
    #[serde(default)]
    pub current_power: f64,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    #[serde(default)]
    pub readings: HashMap<String, f64>,
}

impl PowerEvent {
    pub fn new(
        event_type: PowerEventType,
        phase: Phase,
        power_delta: f64,
        current_power: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            id: None,
            event_type,
            phase,
            power_delta,
            current_power,
            timestamp,
            readings: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_readings(mut self, readings: HashMap<String, f64>) -> Self {
        self.readings = readings;
        self
    }

    /// Parse and validate an event coming from outside the crate
    pub fn from_json(json: &str) -> Result<Self> {
        let event: PowerEvent = serde_json::from_str(json)?;
        event.validate()?;
        Ok(event)
    }

    /// Reject values the scorers cannot work with
    pub fn validate(&self) -> Result<()> {
        if !self.power_delta.is_finite() {
            return Err(Error::InvalidInput("powerDelta must be finite".to_string()));
        }
        if !self.current_power.is_finite() {
            return Err(Error::InvalidInput("currentPower must be finite".to_string()));
        }
        if self.timestamp < 0 {
            return Err(Error::InvalidInput(format!(
                "timestamp must be positive, got {}",
                self.timestamp
            )));
        }
        Ok(())
    }

    /// Reading for a measurement on this event's phase (e.g. `pf` -> `pf_a`)
    pub fn phase_reading(&self, measurement: &str) -> Option<f64> {
        self.readings.get(&self.phase.reading_key(measurement)).copied()
    }
}

/// An appliance registered in the household environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub phase: Phase,
    /// Nameplate peak power (W)
    #[serde(default)]
    pub peak_power: f64,
    /// Typical running power (W)
    #[serde(default)]
    pub average_power: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl Device {
    pub fn new(id: &str, device_type: &str, phase: Phase, peak_power: f64, average_power: f64) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            device_type: device_type.to_string(),
            phase,
            peak_power,
            average_power,
            room: None,
        }
    }
}

/// A room devices can be grouped into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
}

/// The candidate-device universe for inference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub device_types: Vec<String>,
}

impl EnvironmentConfig {
    /// Devices wired to the given phase
    pub fn devices_on(&self, phase: Phase) -> Vec<Device> {
        self.devices
            .iter()
            .filter(|d| d.phase == phase)
            .cloned()
            .collect()
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_event_from_json() {
        let event = PowerEvent::from_json(
            r#"{"type":"peak","phase":"A","powerDelta":1450,"currentPower":1500,"timestamp":1700000000000,
                "readings":{"pf_a":0.92}}"#,
        )
        .unwrap();

        assert_eq!(event.event_type, PowerEventType::Peak);
        assert_eq!(event.phase, Phase::A);
        assert_eq!(event.phase_reading("pf"), Some(0.92));
        assert!(event.id.is_none());
    }

    #[test]
    fn test_power_event_missing_fields_rejected() {
        assert!(PowerEvent::from_json(r#"{"type":"peak","phase":"A","timestamp":1}"#).is_err());
        assert!(PowerEvent::from_json(r#"{"type":"spike","phase":"A","powerDelta":1,"timestamp":1}"#).is_err());
        assert!(PowerEvent::from_json(r#"{"type":"peak","phase":"A","powerDelta":1,"timestamp":-5}"#).is_err());
    }

    #[test]
    fn test_complementary_types() {
        assert_eq!(PowerEventType::Peak.complementary(), PowerEventType::Valley);
        assert_eq!(PowerEventType::Valley.complementary(), PowerEventType::Peak);
        assert!(PowerEventType::Start.is_rising());
        assert!(!PowerEventType::Valley.is_rising());
    }

    #[test]
    fn test_environment_devices_on_phase() {
        let env = EnvironmentConfig {
            devices: vec![
                Device::new("pc", "computer", Phase::A, 300.0, 150.0),
                Device::new("ac", "split", Phase::B, 2000.0, 1500.0),
            ],
            ..Default::default()
        };

        let on_a = env.devices_on(Phase::A);
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_a[0].id, "pc");
        assert!(env.devices_on(Phase::C).is_empty());
        assert!(env.device("ac").is_some());
    }
}
