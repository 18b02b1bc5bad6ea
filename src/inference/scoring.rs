//! Individual confidence signals and suggestion consolidation
//!
//! Every function here is pure: it scores one candidate (or one event) and
//! returns the score with a human readable reason. The engine decides which
//! signals to combine and how.

use crate::core::{Device, DeviceEvent, PowerEvent};
use crate::patterns::{type_power_range, usage_windows, ConsumptionPattern};
use crate::reference::ApplianceReference;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Rising step above which an event is a turn-on (W)
pub const TURN_ON_DELTA: f64 = 50.0;
/// Falling step below which an event is a turn-off (W)
pub const TURN_OFF_DELTA: f64 = -50.0;
/// Largest step still considered a steady load (W)
pub const STABLE_DELTA: f64 = 20.0;
/// Minimum load for a steady event to be scored (W)
pub const STABLE_MIN_POWER: f64 = 100.0;
/// Historical events within this distance of the current delta match (W)
pub const HISTORY_TOLERANCE: f64 = 50.0;

/// Scoring source that produced a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    PatternEnhanced,
    Local,
    Pattern,
    Model,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::PatternEnhanced => "pattern_enhanced",
            Algorithm::Local => "local",
            Algorithm::Pattern => "pattern",
            Algorithm::Model => "model",
        }
    }
}

/// Shape of the transition, decided from the event alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    TurnOn,
    TurnOff,
    Stabilization,
    Unknown,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::TurnOn => "turn_on",
            PatternType::TurnOff => "turn_off",
            PatternType::Stabilization => "stabilization",
            PatternType::Unknown => "unknown",
        }
    }
}

/// A candidate device for an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub device: Device,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub algorithm: Algorithm,
    #[serde(default)]
    pub algorithms: Vec<Algorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_type: Option<PatternType>,
}

impl Suggestion {
    pub fn new(device: Device, confidence: f64, reasoning: Vec<String>, algorithm: Algorithm) -> Self {
        Self {
            device,
            confidence,
            reasoning,
            algorithm,
            algorithms: vec![algorithm],
            pattern_type: None,
        }
    }
}

/// One weighted sub-score
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubScore {
    pub score: f64,
    pub reasoning: Option<String>,
}

impl SubScore {
    fn new(score: f64, reasoning: String) -> Self {
        Self {
            score,
            reasoning: Some(reasoning),
        }
    }
}

pub fn classify_pattern(event: &PowerEvent) -> PatternType {
    let delta = event.power_delta;
    if delta > TURN_ON_DELTA {
        PatternType::TurnOn
    } else if delta < TURN_OFF_DELTA {
        PatternType::TurnOff
    } else if delta.abs() < STABLE_DELTA && event.current_power > STABLE_MIN_POWER {
        PatternType::Stabilization
    } else {
        PatternType::Unknown
    }
}

/// How well the event fits a device's consumption pattern
pub fn match_pattern(event: &PowerEvent, pattern: &ConsumptionPattern, pattern_type: PatternType) -> f64 {
    let delta = event.power_delta.abs();
    match pattern_type {
        PatternType::TurnOn | PatternType::TurnOff => {
            let low = pattern.average_power * 0.7;
            let high = pattern.peak_power * 1.2;
            if delta >= low && delta <= high {
                0.8
            } else if delta >= low * 0.5 && delta <= high * 1.5 {
                0.5
            } else {
                0.0
            }
        }
        PatternType::Stabilization => {
            let power = event.current_power;
            let low = pattern.average_power * 0.8;
            let high = pattern.average_power * 1.2;
            if power >= low && power <= high {
                0.6
            } else if power >= low * 0.6 && power <= high * 1.4 {
                0.3
            } else {
                0.0
            }
        }
        PatternType::Unknown => 0.0,
    }
}

/// Ratio of the observed step to the device's nameplate value
pub fn power_magnitude_score(event: &PowerEvent, device: &Device) -> SubScore {
    let delta = event.power_delta.abs();
    let expected = if event.event_type.is_rising() {
        device.peak_power
    } else {
        device.average_power
    };

    let larger = delta.max(expected);
    if larger <= 0.0 {
        return SubScore::default();
    }
    let ratio = delta.min(expected) / larger;

    if ratio > 0.8 {
        SubScore::new(0.4, format!("Power match: {:.1}W vs expected {}W", delta, expected))
    } else if ratio > 0.6 {
        SubScore::new(0.2, format!("Partial power match: {:.1}W vs expected {}W", delta, expected))
    } else {
        SubScore::default()
    }
}

/// Distance between the step and the reference wattage of the device type.
///
/// `None` when the reference has no entry for the type.
pub fn reference_type_score(
    device_type: &str,
    event: &PowerEvent,
    reference: &ApplianceReference,
) -> Option<SubScore> {
    let found = reference.lookup(device_type)?;
    let delta = event.power_delta.abs();
    let expected = found.watts;
    let kind = found.kind.as_str();

    let tolerance = expected * 0.3;
    let difference = (delta - expected).abs();

    let score = if difference <= tolerance * 0.5 {
        SubScore::new(
            0.4,
            format!("{} match from reference ({}W expected, {}W observed)", kind, expected, delta),
        )
    } else if difference <= tolerance {
        SubScore::new(
            0.2,
            format!(
                "{} match from reference with tolerance ({}W expected, {}W observed)",
                kind, expected, delta
            ),
        )
    } else if difference <= tolerance * 2.0 {
        SubScore::new(
            0.1,
            format!("Weak {} match from reference ({}W expected, {}W observed)", kind, expected, delta),
        )
    } else {
        SubScore::default()
    };
    Some(score)
}

/// Hardcoded per-type power ranges, used without a reference entry
pub fn fallback_type_score(device_type: &str, event: &PowerEvent) -> SubScore {
    let Some(ranges) = type_power_range(device_type) else {
        return SubScore::default();
    };

    let delta = event.power_delta.abs();
    let [low, high] = if event.event_type.is_rising() {
        ranges.peak_range
    } else {
        ranges.valley_range
    };

    if delta >= low && delta <= high {
        SubScore::new(0.3, format!("{} typical power range", device_type))
    } else if delta >= low * 0.7 && delta <= high * 1.3 {
        SubScore::new(0.1, format!("{} extended power range", device_type))
    } else {
        SubScore::default()
    }
}

/// Usage-hour windows of the device type; the last matching window names the reason
pub fn time_of_day_score(device_type: &str, hour: u32) -> SubScore {
    let mut result = SubScore::default();
    for window in usage_windows(device_type) {
        if window.matches(hour) {
            result.score += window.score();
            result.reasoning = Some(window.label().to_string());
        }
    }
    result
}

/// Bonus when the opposite transition happened on the same phase just before
pub fn recent_activity_score(event: &PowerEvent, history: &[PowerEvent], window_ms: i64) -> SubScore {
    let wanted = event.event_type.complementary();
    let latest = history
        .iter()
        .filter(|e| {
            e.phase == event.phase
                && e.event_type == wanted
                && e.timestamp > event.timestamp - window_ms
                && e.timestamp < event.timestamp
        })
        .max_by_key(|e| e.timestamp);

    match latest {
        Some(previous) => {
            let seconds = (event.timestamp - previous.timestamp) as f64 / 1000.0;
            SubScore::new(0.2, format!("Complementary {} event {:.1}s ago", wanted, seconds))
        }
        None => SubScore::default(),
    }
}

/// Devices previously recorded for similar transitions
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalMatch {
    pub device_id: String,
    pub occurrences: usize,
    pub confidence: f64,
}

pub fn historical_matches(event: &PowerEvent, device_events: &[DeviceEvent]) -> Vec<HistoricalMatch> {
    let mut matches: Vec<HistoricalMatch> = Vec::new();

    for recorded in device_events.iter().filter(|r| {
        r.phase == event.phase
            && r.trigger_type == event.event_type
            && (r.start_power_delta - event.power_delta).abs() <= HISTORY_TOLERANCE
    }) {
        match matches.iter_mut().find(|m| m.device_id == recorded.device_id) {
            Some(existing) => {
                existing.occurrences += 1;
                existing.confidence = (existing.confidence + 0.1).min(0.9);
            }
            None => matches.push(HistoricalMatch {
                device_id: recorded.device_id.clone(),
                occurrences: 1,
                confidence: 0.5,
            }),
        }
    }

    matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
    matches
}

/// Merge suggestions for the same device and rank them.
///
/// The merged confidence is the highest per-source confidence. Reasons are
/// concatenated in source order. Ties keep first-seen order.
pub fn consolidate(suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
    let mut merged: Vec<Suggestion> = Vec::new();

    for suggestion in suggestions {
        match merged.iter_mut().find(|s| s.device.id == suggestion.device.id) {
            Some(existing) => {
                existing.confidence = existing.confidence.max(suggestion.confidence);
                existing.reasoning.extend(suggestion.reasoning);
                if !existing.algorithms.contains(&suggestion.algorithm) {
                    existing.algorithms.push(suggestion.algorithm);
                }
                if existing.pattern_type.is_none() {
                    existing.pattern_type = suggestion.pattern_type;
                }
            }
            None => merged.push(suggestion),
        }
    }

    merged.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DeviceEventType, EventSource, Phase, PowerEventType};

    const T0: i64 = 1_700_000_000_000;

    fn peak(delta: f64, current: f64) -> PowerEvent {
        PowerEvent::new(PowerEventType::Peak, Phase::A, delta, current, T0)
    }

    #[test]
    fn test_pattern_classification_cutoffs() {
        assert_eq!(classify_pattern(&peak(51.0, 0.0)), PatternType::TurnOn);
        assert_eq!(classify_pattern(&peak(50.0, 500.0)), PatternType::Unknown);
        assert_eq!(classify_pattern(&peak(-51.0, 0.0)), PatternType::TurnOff);
        assert_eq!(classify_pattern(&peak(19.0, 101.0)), PatternType::Stabilization);
        assert_eq!(classify_pattern(&peak(19.0, 100.0)), PatternType::Unknown);
        assert_eq!(classify_pattern(&peak(20.0, 500.0)), PatternType::Unknown);
    }

    #[test]
    fn test_turn_on_ranges() {
        let pattern = ConsumptionPattern::for_type("split");
        // core range [1050, 2400], extended [525, 3600]
        assert_eq!(match_pattern(&peak(1450.0, 1500.0), &pattern, PatternType::TurnOn), 0.8);
        assert_eq!(match_pattern(&peak(600.0, 600.0), &pattern, PatternType::TurnOn), 0.5);
        assert_eq!(match_pattern(&peak(4000.0, 4000.0), &pattern, PatternType::TurnOn), 0.0);
        assert_eq!(match_pattern(&peak(-2000.0, 0.0), &pattern, PatternType::TurnOff), 0.8);
    }

    #[test]
    fn test_stabilization_ranges() {
        let pattern = ConsumptionPattern::for_type("split");
        // core [1200, 1800], extended [720, 2520]
        assert_eq!(match_pattern(&peak(5.0, 1500.0), &pattern, PatternType::Stabilization), 0.6);
        assert_eq!(match_pattern(&peak(5.0, 800.0), &pattern, PatternType::Stabilization), 0.3);
        assert_eq!(match_pattern(&peak(5.0, 300.0), &pattern, PatternType::Stabilization), 0.0);
        assert_eq!(match_pattern(&peak(5.0, 1500.0), &pattern, PatternType::Unknown), 0.0);
    }

    #[test]
    fn test_power_magnitude_uses_peak_for_rising_events() {
        let device = Device::new("ac", "split", Phase::A, 2000.0, 1500.0);

        let full = power_magnitude_score(&peak(1800.0, 1800.0), &device);
        assert_eq!(full.score, 0.4);
        assert_eq!(full.reasoning.as_deref(), Some("Power match: 1800.0W vs expected 2000W"));

        let valley = PowerEvent::new(PowerEventType::Valley, Phase::A, -1000.0, 0.0, T0);
        // 1000 / 1500
        assert_eq!(power_magnitude_score(&valley, &device).score, 0.2);

        let zero = Device::new("ghost", "split", Phase::A, 0.0, 0.0);
        assert_eq!(power_magnitude_score(&peak(0.0, 0.0), &zero).score, 0.0);
    }

    #[test]
    fn test_reference_tolerance_bands() {
        let reference = ApplianceReference::from_entries(vec![("Kettle", 2000.0)]);
        // tolerance 600
        let close = reference_type_score("Kettle", &peak(2250.0, 0.0), &reference).unwrap();
        assert_eq!(close.score, 0.4);
        assert!(close.reasoning.unwrap().starts_with("exact match"));

        let medium = reference_type_score("kettle", &peak(1500.0, 0.0), &reference).unwrap();
        assert_eq!(medium.score, 0.2);

        let weak = reference_type_score("Kettle", &peak(3100.0, 0.0), &reference).unwrap();
        assert_eq!(weak.score, 0.1);

        let miss = reference_type_score("Kettle", &peak(200.0, 0.0), &reference).unwrap();
        assert_eq!(miss.score, 0.0);

        assert!(reference_type_score("toaster", &peak(200.0, 0.0), &reference).is_none());
    }

    #[test]
    fn test_fallback_ranges() {
        let typical = fallback_type_score("stampante", &peak(150.0, 150.0));
        assert_eq!(typical.score, 0.3);
        assert_eq!(typical.reasoning.as_deref(), Some("stampante typical power range"));

        let valley = PowerEvent::new(PowerEventType::Valley, Phase::A, -60.0, 0.0, T0);
        assert_eq!(fallback_type_score("stampante", &valley).score, 0.1);
        assert_eq!(fallback_type_score("toaster", &valley).score, 0.0);
    }

    #[test]
    fn test_time_of_day() {
        let computer = time_of_day_score("computer", 10);
        assert_eq!(computer.score, 0.1);
        assert_eq!(computer.reasoning.as_deref(), Some("Work hours usage pattern"));
        assert_eq!(time_of_day_score("forno microonde", 13).score, 0.15);
        assert_eq!(time_of_day_score("split", 13).score, 0.0);
    }

    #[test]
    fn test_recent_activity_window() {
        let event = peak(500.0, 600.0);
        let history = vec![
            PowerEvent::new(PowerEventType::Valley, Phase::A, -400.0, 100.0, T0 - 6000),
            PowerEvent::new(PowerEventType::Valley, Phase::B, -400.0, 100.0, T0 - 1000),
            PowerEvent::new(PowerEventType::Peak, Phase::A, 400.0, 500.0, T0 - 1000),
        ];
        assert_eq!(recent_activity_score(&event, &history, 5000).score, 0.0);

        let mut history = history;
        history.push(PowerEvent::new(PowerEventType::Valley, Phase::A, -400.0, 100.0, T0 - 3500));
        let recent = recent_activity_score(&event, &history, 5000);
        assert_eq!(recent.score, 0.2);
        assert_eq!(recent.reasoning.as_deref(), Some("Complementary valley event 3.5s ago"));
    }

    #[test]
    fn test_historical_confidence_grows_and_caps() {
        let start = peak(1000.0, 1000.0);
        let mut recorded: Vec<DeviceEvent> = (0..6)
            .map(|i| {
                let e = PowerEvent::new(PowerEventType::Peak, Phase::A, 980.0 + i as f64, 1000.0, T0 - 1000 * i);
                DeviceEvent::from_power_events("ac", &e, None, DeviceEventType::Usage, EventSource::Manual, 1.0)
            })
            .collect();
        let far = PowerEvent::new(PowerEventType::Peak, Phase::A, 1200.0, 1200.0, T0);
        recorded.push(DeviceEvent::from_power_events(
            "pc", &far, None, DeviceEventType::Usage, EventSource::Manual, 1.0,
        ));

        let matches = historical_matches(&start, &recorded);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].occurrences, 6);
        assert!((matches[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_consolidate_takes_max_not_sum() {
        let ac = Device::new("ac", "split", Phase::A, 2000.0, 1500.0);
        let pc = Device::new("pc", "computer", Phase::A, 300.0, 150.0);

        let merged = consolidate(vec![
            Suggestion::new(ac.clone(), 0.8, vec!["a".into()], Algorithm::PatternEnhanced),
            Suggestion::new(pc.clone(), 0.5, vec!["b".into()], Algorithm::Local),
            Suggestion::new(ac.clone(), 0.6, vec!["c".into()], Algorithm::Local),
            Suggestion::new(ac, 0.5, vec!["d".into()], Algorithm::Local),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].device.id, "ac");
        assert_eq!(merged[0].confidence, 0.8);
        assert_eq!(merged[0].reasoning, vec!["a", "c", "d"]);
        assert_eq!(merged[0].algorithms, vec![Algorithm::PatternEnhanced, Algorithm::Local]);
        assert_eq!(merged[1].device.id, "pc");
    }
}
