//! Consumption analytics over recorded device events

use crate::core::{Device, DeviceEvent, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const HOUR_MS: i64 = 3_600_000;

/// Look-back window for an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    Hour,
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Hour => "1h",
            TimeRange::Day => "24h",
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
            TimeRange::All => "all",
        }
    }

    /// Window length, `None` for an unbounded range
    pub fn duration_ms(&self) -> Option<i64> {
        match self {
            TimeRange::Hour => Some(HOUR_MS),
            TimeRange::Day => Some(24 * HOUR_MS),
            TimeRange::Week => Some(7 * 24 * HOUR_MS),
            TimeRange::Month => Some(30 * 24 * HOUR_MS),
            TimeRange::All => None,
        }
    }
}

impl FromStr for TimeRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1h" => Ok(TimeRange::Hour),
            "24h" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            "all" => Ok(TimeRange::All),
            other => Err(Error::InvalidInput(format!("Unknown time range: {}", other))),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregates for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConsumption {
    /// Registry entry, `None` for events of a device no longer registered
    pub device: Option<Device>,
    pub event_count: usize,
    /// Wh
    pub total_consumption: f64,
    /// ms
    pub total_duration: i64,
    /// ms
    pub average_duration: f64,
    /// W
    pub average_power: f64,
    pub events: Vec<DeviceEvent>,
}

impl DeviceConsumption {
    fn empty(device: Option<Device>) -> Self {
        Self {
            device,
            event_count: 0,
            total_consumption: 0.0,
            total_duration: 0,
            average_duration: 0.0,
            average_power: 0.0,
            events: Vec::new(),
        }
    }

    fn add(&mut self, event: &DeviceEvent) {
        self.event_count += 1;
        self.total_consumption += event.total_consumption;
        self.total_duration += event.duration.unwrap_or(0);
        self.events.push(event.clone());
    }

    fn finalize(&mut self) {
        if self.event_count > 0 {
            self.average_duration = self.total_duration as f64 / self.event_count as f64;
        }
        if self.total_duration > 0 {
            self.average_power = self.total_consumption / (self.total_duration as f64 / HOUR_MS as f64);
        }
    }
}

/// Result of [`consumption_analysis`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionAnalysis {
    pub time_range: TimeRange,
    pub total_events: usize,
    /// Wh
    pub total_consumption: f64,
    /// Keyed by device id
    pub device_stats: BTreeMap<String, DeviceConsumption>,
    pub events: Vec<DeviceEvent>,
}

/// Aggregate events that started inside `range` (relative to `now_ms`) and
/// consumed energy. Every registered device gets an entry, active or not.
pub fn consumption_analysis(
    events: &[DeviceEvent],
    devices: &[Device],
    range: TimeRange,
    now_ms: i64,
) -> ConsumptionAnalysis {
    let since = range.duration_ms().map(|ms| now_ms - ms);

    let selected: Vec<DeviceEvent> = events
        .iter()
        .filter(|e| since.map_or(true, |since| e.start_time >= since))
        .filter(|e| e.total_consumption > 0.0)
        .cloned()
        .collect();

    let mut device_stats: BTreeMap<String, DeviceConsumption> = devices
        .iter()
        .map(|d| (d.id.clone(), DeviceConsumption::empty(Some(d.clone()))))
        .collect();

    for event in &selected {
        device_stats
            .entry(event.device_id.clone())
            .or_insert_with(|| DeviceConsumption::empty(None))
            .add(event);
    }
    device_stats.values_mut().for_each(DeviceConsumption::finalize);

    let total_consumption = selected.iter().map(|e| e.total_consumption).sum();
    log::debug!(
        "Consumption analysis over {}: {} events, {:.3}Wh",
        range,
        selected.len(),
        total_consumption
    );

    ConsumptionAnalysis {
        time_range: range,
        total_events: selected.len(),
        total_consumption,
        device_stats,
        events: selected,
    }
}
