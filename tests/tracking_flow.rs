//! End-to-end checks across detector, inference and the tracking store

use meter_tracker_lib::analytics::TimeRange;
use meter_tracker_lib::core::{
    Config, Device, DeviceEventType, Phase, PowerEvent, PowerEventType, Sample,
};
use meter_tracker_lib::db::Database;
use meter_tracker_lib::detection::{EpisodeType, EventDetector};
use meter_tracker_lib::inference::Algorithm;
use meter_tracker_lib::reference::ApplianceReference;
use meter_tracker_lib::tracking::{AssociationQuery, DeviceTracker};

const T0: i64 = 1_700_000_000_000;

fn tracker_with(devices: Vec<Device>, reference: ApplianceReference) -> DeviceTracker {
    let mut config = Config::default();
    config.environment.devices = devices;
    let db = Database::open_in_memory().unwrap();
    DeviceTracker::new(Box::new(db), &config, reference)
}

fn split() -> Device {
    Device::new("ac", "split", Phase::A, 2000.0, 1500.0)
}

#[test]
fn split_turn_on_is_attributed() {
    let mut tracker = tracker_with(vec![split()], ApplianceReference::new());
    let event = PowerEvent::new(PowerEventType::Peak, Phase::A, 1450.0, 1500.0, T0);

    let suggestions = tracker.analyze_event(&event);
    assert_eq!(suggestions.len(), 1);

    let top = &suggestions[0];
    assert_eq!(top.device.id, "ac");
    assert!(top.confidence >= 0.6);
    assert_eq!(top.algorithms, vec![Algorithm::PatternEnhanced, Algorithm::Local]);
    assert!(top.reasoning.iter().any(|r| r.starts_with("Consumption pattern match: turn_on")));
}

#[test]
fn closer_type_wattage_ranks_higher() {
    let reference = ApplianceReference::from_entries([("kettle", 1000.0), ("heater", 1800.0)]);
    let devices = vec![
        Device::new("h1", "heater", Phase::B, 1200.0, 900.0),
        Device::new("k1", "kettle", Phase::B, 1200.0, 900.0),
    ];
    let mut tracker = tracker_with(devices, reference);

    let event = PowerEvent::new(PowerEventType::Peak, Phase::B, 1000.0, 1010.0, T0);
    let suggestions = tracker.analyze_event(&event);

    assert_eq!(suggestions.len(), 2);
    assert_eq!(suggestions[0].device.id, "k1");
    assert_eq!(suggestions[1].device.id, "h1");
    assert!(suggestions[0].confidence > suggestions[1].confidence);
}

#[test]
fn pattern_buffers_keep_last_ten_durations() {
    let mut tracker = tracker_with(vec![split()], ApplianceReference::new());

    for i in 1..=11_i64 {
        let start_ts = T0 + i * 3_600_000;
        let on = PowerEvent::new(PowerEventType::Peak, Phase::A, 1500.0, 1500.0, start_ts);
        let off = PowerEvent::new(PowerEventType::Valley, Phase::A, -1500.0, 0.0, start_ts + i * 60_000);
        tracker.record_device_event("ac", &on, Some(&off), DeviceEventType::Usage).unwrap();
    }

    let pattern = tracker.patterns().get("ac").unwrap();
    assert_eq!(pattern.observed_durations.len(), 10);
    assert_eq!(pattern.observed_average_powers.len(), 10);
    // minutes 2..=11
    assert_eq!(pattern.average_duration, Some(6.5 * 60_000.0));
    assert_eq!(pattern.learned_average_power, Some(1500.0));
}

#[test]
fn detected_events_flow_into_analysis() {
    let mut tracker = tracker_with(vec![split()], ApplianceReference::new());
    let mut detector = EventDetector::new(&Config::default().detection);

    let powers = [5.0, 1455.0, 1400.0, 1400.0, 20.0, 25.0];
    let mut events = Vec::new();
    let mut episodes = Vec::new();
    for (i, power) in powers.iter().enumerate() {
        let output = detector.push(Sample::new(Phase::A, T0 + i as i64 * 1000, *power));
        events.extend(output.events);
        episodes.extend(output.episode);
    }
    episodes.extend(detector.finish(T0 + 5000));

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, PowerEventType::Peak);
    assert_eq!(events[0].power_delta, 1450.0);
    assert_eq!(events[1].event_type, PowerEventType::Valley);
    assert_eq!(events[1].power_delta, -1380.0);

    assert_eq!(episodes.len(), 1);
    assert_eq!(episodes[0].episode_type, EpisodeType::High);
    assert_eq!(tracker.store_episodes(episodes).unwrap(), 0);

    let top = tracker.analyze_event(&events[0]);
    assert_eq!(top[0].device.id, "ac");
    tracker.add_event_to_history(events[0].clone());

    let recorded = tracker.record_device_event("ac", &events[0], Some(&events[1]), DeviceEventType::Usage).unwrap();
    assert_eq!(recorded.duration, Some(3000));
    assert!(recorded.total_consumption > 0.0);

    let analysis = tracker.consumption_analysis(TimeRange::Hour, T0 + 60_000);
    assert_eq!(analysis.total_events, 1);
    assert_eq!(analysis.device_stats["ac"].event_count, 1);
}

#[test]
fn export_then_import_restores_associations() {
    let mut tracker = tracker_with(vec![split()], ApplianceReference::new());
    let on = PowerEvent::new(PowerEventType::Peak, Phase::A, 1450.0, 1500.0, T0).with_id("evt-1");
    let off = PowerEvent::new(PowerEventType::Valley, Phase::A, -1450.0, 50.0, T0 + 600_000);
    tracker.record_device_event("ac", &on, Some(&off), DeviceEventType::Usage).unwrap();
    tracker.record_device_event("ac", &off, None, DeviceEventType::ManualStart).unwrap();

    let backup = tracker.export_tracking_data().unwrap();
    assert!(tracker.clear_tracking_data());
    assert!(tracker.associations().is_empty());

    assert!(tracker.import_tracking_data(&backup));
    assert_eq!(tracker.associations().len(), 2);
    assert_eq!(tracker.learning_data().len(), 2);
    assert_eq!(tracker.associations()[0].event_id.as_deref(), Some("evt-1"));

    let removed = tracker.remove_all_event_associations(&AssociationQuery::from_event(&on));
    assert_eq!(removed.len(), 1);
    assert_eq!(tracker.associations().len(), 1);
}
