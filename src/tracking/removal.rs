//! Locating the device events a removal request refers to
//!
//! Callers identify an association loosely: sometimes with the id of the
//! power event, sometimes only with a device, a time and a phase. The tiers
//! below go from most to least specific and the first tier with any match
//! wins.

use crate::core::{DeviceEvent, Phase, PowerEvent, PowerEventType};

/// Device-scoped matches must start within this distance of the query (ms)
pub const DEVICE_WINDOW_MS: i64 = 30_000;
/// Unscoped matches must start within this distance of the query (ms)
pub const EVENT_WINDOW_MS: i64 = 5_000;

/// Description of the association to remove
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationQuery {
    pub event_id: Option<String>,
    pub device_id: Option<String>,
    pub association_id: Option<String>,
    pub timestamp: i64,
    pub phase: Phase,
    pub event_type: PowerEventType,
}

impl AssociationQuery {
    /// Query built from the power event the association was recorded for
    pub fn from_event(event: &PowerEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            device_id: None,
            association_id: None,
            timestamp: event.timestamp,
            phase: event.phase,
            event_type: event.event_type,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_association_id(mut self, id: impl Into<String>) -> Self {
        self.association_id = Some(id.into());
        self
    }
}

/// Which tier produced the matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalTier {
    EventId,
    DeviceWindow,
    TimePhaseType,
    AssociationId,
}

pub fn match_event_id(events: &[DeviceEvent], query: &AssociationQuery) -> Vec<usize> {
    let Some(event_id) = query.event_id.as_deref() else {
        return Vec::new();
    };
    indices(events, |e| e.event_id.as_deref() == Some(event_id))
}

pub fn match_device_window(events: &[DeviceEvent], query: &AssociationQuery) -> Vec<usize> {
    let Some(device_id) = query.device_id.as_deref() else {
        return Vec::new();
    };
    indices(events, |e| {
        e.device_id == device_id
            && (e.start_time - query.timestamp).abs() <= DEVICE_WINDOW_MS
            && e.phase == query.phase
    })
}

pub fn match_time_phase_type(events: &[DeviceEvent], query: &AssociationQuery) -> Vec<usize> {
    indices(events, |e| {
        (e.start_time - query.timestamp).abs() <= EVENT_WINDOW_MS
            && e.phase == query.phase
            && e.trigger_type == query.event_type
    })
}

pub fn match_association_id(events: &[DeviceEvent], query: &AssociationQuery) -> Vec<usize> {
    let Some(id) = query.association_id.as_deref() else {
        return Vec::new();
    };
    indices(events, |e| e.id == id)
}

/// Run the tiers in order and return the first non-empty result.
///
/// With `device_scope` set, only events of that device can match at any tier.
pub fn find_removals(
    events: &[DeviceEvent],
    query: &AssociationQuery,
    device_scope: Option<&str>,
) -> Option<(RemovalTier, Vec<usize>)> {
    let tiers: [(RemovalTier, fn(&[DeviceEvent], &AssociationQuery) -> Vec<usize>); 4] = [
        (RemovalTier::EventId, match_event_id),
        (RemovalTier::DeviceWindow, match_device_window),
        (RemovalTier::TimePhaseType, match_time_phase_type),
        (RemovalTier::AssociationId, match_association_id),
    ];

    for (tier, matcher) in tiers {
        let found: Vec<usize> = matcher(events, query)
            .into_iter()
            .filter(|&i| device_scope.map_or(true, |d| events[i].device_id == d))
            .collect();
        if !found.is_empty() {
            return Some((tier, found));
        }
    }
    None
}

fn indices(events: &[DeviceEvent], pred: impl Fn(&DeviceEvent) -> bool) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| pred(e))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DeviceEventType, EventSource};

    const T0: i64 = 1_700_000_000_000;

    fn recorded(device: &str, id: Option<&str>, phase: Phase, event_type: PowerEventType, ts: i64) -> DeviceEvent {
        let mut start = PowerEvent::new(event_type, phase, 500.0, 500.0, ts);
        start.id = id.map(str::to_string);
        DeviceEvent::from_power_events(device, &start, None, DeviceEventType::Usage, EventSource::Manual, 1.0)
    }

    fn store() -> Vec<DeviceEvent> {
        vec![
            recorded("ac", Some("evt-1"), Phase::A, PowerEventType::Peak, T0),
            recorded("pc", Some("evt-1"), Phase::A, PowerEventType::Peak, T0),
            recorded("ac", None, Phase::A, PowerEventType::Peak, T0 + 20_000),
            recorded("lamp", None, Phase::B, PowerEventType::Valley, T0 + 3_000),
        ]
    }

    fn query(ts: i64, phase: Phase, event_type: PowerEventType) -> AssociationQuery {
        AssociationQuery::from_event(&PowerEvent::new(event_type, phase, 0.0, 0.0, ts))
    }

    #[test]
    fn test_event_id_tier() {
        let events = store();
        let mut q = query(T0, Phase::A, PowerEventType::Peak);
        q.event_id = Some("evt-1".into());

        assert_eq!(match_event_id(&events, &q), vec![0, 1]);
        assert_eq!(find_removals(&events, &q, None), Some((RemovalTier::EventId, vec![0, 1])));
        assert_eq!(find_removals(&events, &q, Some("pc")), Some((RemovalTier::EventId, vec![1])));
    }

    #[test]
    fn test_device_window_tier() {
        let events = store();
        let q = query(T0 + 10_000, Phase::A, PowerEventType::Valley).with_device("ac");

        assert_eq!(match_device_window(&events, &q), vec![0, 2]);
        let (tier, found) = find_removals(&events, &q, Some("ac")).unwrap();
        assert_eq!(tier, RemovalTier::DeviceWindow);
        assert_eq!(found, vec![0, 2]);

        let wrong_phase = query(T0 + 10_000, Phase::C, PowerEventType::Valley).with_device("ac");
        assert!(match_device_window(&events, &wrong_phase).is_empty());
    }

    #[test]
    fn test_time_phase_type_tier() {
        let events = store();
        let q = query(T0 + 1_000, Phase::B, PowerEventType::Valley);

        assert!(match_event_id(&events, &q).is_empty());
        assert_eq!(find_removals(&events, &q, None), Some((RemovalTier::TimePhaseType, vec![3])));

        let other_type = query(T0 + 1_000, Phase::B, PowerEventType::Peak);
        assert!(match_time_phase_type(&events, &other_type).is_empty());
    }

    #[test]
    fn test_association_id_tier_is_last_resort() {
        let events = store();
        let id = events[2].id.clone();
        let q = query(T0 + 999_999, Phase::C, PowerEventType::Peak).with_association_id(id);

        assert_eq!(find_removals(&events, &q, None), Some((RemovalTier::AssociationId, vec![2])));
    }

    #[test]
    fn test_no_match_is_none() {
        let events = store();
        let q = query(T0 - 3_600_000, Phase::C, PowerEventType::Start);
        assert_eq!(find_removals(&events, &q, None), None);
        assert_eq!(find_removals(&[], &q, None), None);
    }
}
