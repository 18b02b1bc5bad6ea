//! Consumption-pattern model
//!
//! Each device gets a pattern describing how it is expected to behave
//! electrically. Patterns are created lazily from the type defaults (or from
//! the appliance reference wattage) and refined with a sliding window of
//! observed durations and average powers every time a device event is
//! recorded for the device.

pub mod defaults;

use crate::core::Device;
use crate::reference::ApplianceReference;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

pub use defaults::{type_power_range, type_profile, usage_windows, TypePowerRange, UsageWindow};

/// Observations kept per learned series
pub const MAX_OBSERVATIONS: usize = 10;

/// Expected and learned electrical behavior of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionPattern {
    /// ms
    pub turn_on_duration: i64,
    /// ms
    pub stabilization_duration: i64,
    /// ms
    pub turn_off_duration: i64,
    pub peak_power: f64,
    pub average_power: f64,
    pub standby_power: f64,
    pub power_factor_range: [f64; 2],
    #[serde(default)]
    pub observed_durations: VecDeque<i64>,
    #[serde(default)]
    pub observed_average_powers: VecDeque<f64>,
    #[serde(default)]
    pub average_duration: Option<f64>,
    #[serde(default)]
    pub learned_average_power: Option<f64>,
}

impl ConsumptionPattern {
    /// Built-in pattern for a device type, the computer profile when unknown
    pub fn for_type(device_type: &str) -> Self {
        let profile = defaults::profile_or_fallback(device_type);
        Self {
            turn_on_duration: profile.turn_on_duration,
            stabilization_duration: profile.stabilization_duration,
            turn_off_duration: profile.turn_off_duration,
            peak_power: profile.peak_power,
            average_power: profile.average_power,
            standby_power: profile.standby_power,
            power_factor_range: profile.power_factor_range,
            observed_durations: VecDeque::with_capacity(MAX_OBSERVATIONS),
            observed_average_powers: VecDeque::with_capacity(MAX_OBSERVATIONS),
            average_duration: None,
            learned_average_power: None,
        }
    }

    /// Pattern derived from a reference wattage: peak at the nameplate value,
    /// average at 80% of it
    pub fn from_reference(device_type: &str, expected_watts: f64) -> Self {
        let timings = defaults::type_timings(device_type);
        Self {
            turn_on_duration: timings.turn_on_duration,
            stabilization_duration: timings.stabilization_duration,
            turn_off_duration: timings.turn_off_duration,
            peak_power: expected_watts,
            average_power: (expected_watts * 0.8).round(),
            standby_power: timings.standby_power,
            power_factor_range: timings.power_factor_range,
            observed_durations: VecDeque::with_capacity(MAX_OBSERVATIONS),
            observed_average_powers: VecDeque::with_capacity(MAX_OBSERVATIONS),
            average_duration: None,
            learned_average_power: None,
        }
    }

    /// Fold one recorded device event into the learned values.
    ///
    /// Non-positive durations and zero powers carry no information and are
    /// skipped.
    pub fn learn(&mut self, duration: Option<i64>, average_power: f64) {
        if let Some(duration) = duration.filter(|d| *d > 0) {
            push_bounded(&mut self.observed_durations, duration);
            let sum: i64 = self.observed_durations.iter().sum();
            self.average_duration = Some(sum as f64 / self.observed_durations.len() as f64);
        }

        if average_power != 0.0 && average_power.is_finite() {
            push_bounded(&mut self.observed_average_powers, average_power);
            let sum: f64 = self.observed_average_powers.iter().sum();
            self.learned_average_power = Some(sum / self.observed_average_powers.len() as f64);
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T) {
    queue.push_back(value);
    while queue.len() > MAX_OBSERVATIONS {
        queue.pop_front();
    }
}

/// All consumption patterns, keyed by device id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternBook {
    patterns: BTreeMap<String, ConsumptionPattern>,
}

impl PatternBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: &str) -> Option<&ConsumptionPattern> {
        self.patterns.get(device_id)
    }

    /// Pattern for a device, created on first lookup.
    ///
    /// When a reference table is given and has an entry for the device type,
    /// the new pattern is seeded from it; otherwise from the type defaults.
    pub fn get_or_create(
        &mut self,
        device: &Device,
        reference: Option<&ApplianceReference>,
    ) -> &mut ConsumptionPattern {
        self.patterns.entry(device.id.clone()).or_insert_with(|| {
            let seeded = reference
                .and_then(|r| r.lookup(&device.device_type))
                .map(|m| ConsumptionPattern::from_reference(&device.device_type, m.watts));
            match seeded {
                Some(pattern) => {
                    log::debug!("Seeded pattern for {} from reference", device.id);
                    pattern
                }
                None => ConsumptionPattern::for_type(&device.device_type),
            }
        })
    }

    /// Learn from a recorded event; unknown device types use the fallback profile
    pub fn learn(&mut self, device_id: &str, device_type: Option<&str>, duration: Option<i64>, average_power: f64) {
        let pattern = self
            .patterns
            .entry(device_id.to_string())
            .or_insert_with(|| ConsumptionPattern::for_type(device_type.unwrap_or_default()));
        pattern.learn(duration, average_power);
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn clear(&mut self) {
        self.patterns.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConsumptionPattern)> {
        self.patterns.iter()
    }
}
