//! Association and event store
//!
//! [`DeviceTracker`] owns every piece of mutable tracking state: recorded
//! device events, learning samples, the bounded raw event history and the
//! per-device consumption patterns. Each mutation is written back through
//! [`Persistence`] as one batch.

pub mod removal;

use crate::analytics::{self, ConsumptionAnalysis, TimeRange};
use crate::core::{
    Config, DeviceEvent, DeviceEventType, EnvironmentConfig, Error, EventSource, LearningSample,
    LegacyAssociation, Phase, PowerEvent, PowerEventType, Result, TrackingConfig,
};
use crate::db::Persistence;
use crate::detection::{merge_episodes, ThresholdEpisode};
use crate::inference::{InferenceContext, InferenceEngine, Suggestion};
use crate::patterns::PatternBook;
use crate::reference::ApplianceReference;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use removal::{find_removals, AssociationQuery, RemovalTier};

pub const DEVICE_EVENTS: &str = "device_events";
pub const LEARNING_DATA: &str = "learning_data";
pub const EVENT_HISTORY: &str = "event_history";
pub const CONSUMPTION_PATTERNS: &str = "consumption_patterns";
pub const CONSUMPTION_EPISODES: &str = "consumption_episodes";

pub const EXPORT_VERSION: &str = "1.0";

/// In-memory copy of the persisted tracking collections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingData {
    pub device_events: Vec<DeviceEvent>,
    pub learning_data: Vec<LearningSample>,
    pub event_history: Vec<PowerEvent>,
    pub patterns: PatternBook,
}

/// Aggregate counts over the recorded device events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStats {
    pub total_associations: usize,
    pub manual_associations: usize,
    pub auto_associations: usize,
    pub device_breakdown: BTreeMap<String, usize>,
    pub phase_breakdown: BTreeMap<Phase, usize>,
    pub type_breakdown: BTreeMap<PowerEventType, usize>,
}

/// Backup document produced by [`DeviceTracker::export_tracking_data`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingExport {
    pub device_events: Vec<DeviceEvent>,
    pub learning_data: Vec<LearningSample>,
    pub event_history: Vec<PowerEvent>,
    pub consumption_patterns: PatternBook,
    pub exported_at: String,
    pub version: String,
}

/// Accepted import document; every section is optional
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackingImport {
    #[serde(default)]
    device_events: Option<Vec<DeviceEvent>>,
    #[serde(default)]
    device_associations: Option<Vec<LegacyAssociation>>,
    #[serde(default)]
    learning_data: Option<Vec<LearningSample>>,
    #[serde(default)]
    event_history: Option<Vec<PowerEvent>>,
    #[serde(default)]
    consumption_patterns: Option<PatternBook>,
}

pub struct DeviceTracker {
    store: Box<dyn Persistence>,
    config: TrackingConfig,
    environment: EnvironmentConfig,
    engine: InferenceEngine,
    data: TrackingData,
}

impl DeviceTracker {
    /// Create a tracker and load whatever state the store holds
    pub fn new(store: Box<dyn Persistence>, config: &Config, reference: ApplianceReference) -> Self {
        let engine = InferenceEngine::new(reference, &config.tracking);
        let mut tracker = Self {
            store,
            config: config.tracking.clone(),
            environment: config.environment.clone(),
            engine,
            data: TrackingData::default(),
        };
        tracker.load();
        tracker
    }

    /// Reload every collection from the store. A missing collection starts
    /// empty; a malformed one is reset and logged.
    pub fn load(&mut self) {
        self.data = TrackingData {
            device_events: self.load_collection(DEVICE_EVENTS),
            learning_data: self.load_collection(LEARNING_DATA),
            event_history: self.load_collection(EVENT_HISTORY),
            patterns: self.load_collection(CONSUMPTION_PATTERNS),
        };
        log::info!(
            "Tracker loaded: {} device events, {} learning samples, {} history entries, {} patterns",
            self.data.device_events.len(),
            self.data.learning_data.len(),
            self.data.event_history.len(),
            self.data.patterns.len()
        );
    }

    fn load_collection<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        match self.store.load(name) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::warn!("Malformed {} collection, resetting: {}", name, e);
                T::default()
            }),
            Ok(None) => T::default(),
            Err(e) => {
                log::warn!("Failed to load {} collection: {}", name, e);
                T::default()
            }
        }
    }

    /// Write all tracking collections in one batch. Failures are logged and
    /// the in-memory state is kept.
    fn save(&self) {
        if let Err(e) = self.try_save() {
            log::error!("Failed to persist tracking data: {}", e);
        }
    }

    fn try_save(&self) -> Result<()> {
        let batch = [
            (DEVICE_EVENTS, serde_json::to_string(&self.data.device_events)?),
            (LEARNING_DATA, serde_json::to_string(&self.data.learning_data)?),
            (EVENT_HISTORY, serde_json::to_string(&self.data.event_history)?),
            (CONSUMPTION_PATTERNS, serde_json::to_string(&self.data.patterns)?),
        ];
        self.store.persist_batch(&batch)
    }

    pub fn environment(&self) -> &EnvironmentConfig {
        &self.environment
    }

    pub fn set_environment(&mut self, environment: EnvironmentConfig) {
        self.environment = environment;
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut InferenceEngine {
        &mut self.engine
    }

    pub fn data(&self) -> &TrackingData {
        &self.data
    }

    /// Ranked device suggestions for a power event
    pub fn analyze_event(&mut self, event: &PowerEvent) -> Vec<Suggestion> {
        let ctx = InferenceContext {
            devices: &self.environment.devices,
            patterns: &mut self.data.patterns,
            history: &self.data.event_history,
            device_events: &self.data.device_events,
        };
        self.engine.analyze(event, ctx)
    }

    /// Same as [`analyze_event`](Self::analyze_event) for an event arriving as
    /// JSON; invalid input yields no suggestions
    pub fn analyze_event_json(&mut self, json: &str) -> Vec<Suggestion> {
        match PowerEvent::from_json(json) {
            Ok(event) => self.analyze_event(&event),
            Err(e) => {
                log::warn!("Rejected power event: {}", e);
                Vec::new()
            }
        }
    }

    /// Record a user-confirmed device activation
    pub fn record_device_event(
        &mut self,
        device_id: &str,
        start: &PowerEvent,
        end: Option<&PowerEvent>,
        event_type: DeviceEventType,
    ) -> Result<DeviceEvent> {
        let source = match event_type {
            DeviceEventType::ManualStart => EventSource::ManualStart,
            _ => EventSource::Manual,
        };
        self.record(device_id, start, end, event_type, source, 1.0)
    }

    /// Record an activation attributed automatically from a suggestion
    pub fn record_auto_device_event(
        &mut self,
        device_id: &str,
        start: &PowerEvent,
        end: Option<&PowerEvent>,
        confidence: f64,
    ) -> Result<DeviceEvent> {
        self.record(device_id, start, end, DeviceEventType::Usage, EventSource::Auto, confidence)
    }

    fn record(
        &mut self,
        device_id: &str,
        start: &PowerEvent,
        end: Option<&PowerEvent>,
        event_type: DeviceEventType,
        source: EventSource,
        confidence: f64,
    ) -> Result<DeviceEvent> {
        DeviceEvent::validate_span(start, end)?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidInput(format!("confidence must be within [0, 1], got {}", confidence)));
        }
        let event = DeviceEvent::from_power_events(device_id, start, end, event_type, source, confidence);

        let device_type = self.environment.device(device_id).map(|d| d.device_type.as_str());
        self.data
            .patterns
            .learn(device_id, device_type, event.duration, event.average_power);

        self.data.device_events.push(event.clone());
        self.data
            .learning_data
            .push(LearningSample::new(device_id, start, source));
        self.save();

        log::info!(
            "Recorded {} event for {} on phase {} ({:.1}W, {:.3}Wh)",
            event.event_type.as_str(),
            device_id,
            event.phase,
            event.average_power,
            event.total_consumption
        );
        Ok(event)
    }

    /// Append to the raw event history, dropping the oldest beyond the limit.
    /// Only the history collection is written.
    pub fn add_event_to_history(&mut self, event: PowerEvent) {
        if let Err(e) = event.validate() {
            log::warn!("Not adding invalid event to history: {}", e);
            return;
        }
        self.data.event_history.push(event);
        let limit = self.config.history_limit;
        if self.data.event_history.len() > limit {
            let excess = self.data.event_history.len() - limit;
            self.data.event_history.drain(..excess);
        }

        let saved = serde_json::to_string(&self.data.event_history)
            .map_err(Error::from)
            .and_then(|json| self.store.persist(EVENT_HISTORY, &json));
        if let Err(e) = saved {
            log::error!("Failed to persist event history: {}", e);
        }
    }

    /// Remove the matching events of one device; returns what was removed
    pub fn remove_device_association(&mut self, device_id: &str, query: &AssociationQuery) -> Vec<DeviceEvent> {
        let mut query = query.clone();
        if query.device_id.is_none() {
            query.device_id = Some(device_id.to_string());
        }
        self.remove_matching(&query, Some(device_id))
    }

    /// Remove the matching events of every device; returns what was removed
    pub fn remove_all_event_associations(&mut self, query: &AssociationQuery) -> Vec<DeviceEvent> {
        self.remove_matching(query, None)
    }

    fn remove_matching(&mut self, query: &AssociationQuery, device_scope: Option<&str>) -> Vec<DeviceEvent> {
        let Some((tier, indices)) = find_removals(&self.data.device_events, query, device_scope) else {
            log::debug!("No associations matched removal at {} on phase {}", query.timestamp, query.phase);
            return Vec::new();
        };

        let mut removed = Vec::with_capacity(indices.len());
        for index in indices.into_iter().rev() {
            removed.push(self.data.device_events.remove(index));
        }
        removed.reverse();
        self.save();

        log::info!("Removed {} association(s) via {:?} match", removed.len(), tier);
        removed
    }

    pub fn associations(&self) -> &[DeviceEvent] {
        &self.data.device_events
    }

    pub fn learning_data(&self) -> &[LearningSample] {
        &self.data.learning_data
    }

    pub fn event_history(&self) -> &[PowerEvent] {
        &self.data.event_history
    }

    pub fn patterns(&self) -> &PatternBook {
        &self.data.patterns
    }

    pub fn tracking_stats(&self) -> TrackingStats {
        let events = &self.data.device_events;
        let mut stats = TrackingStats {
            total_associations: events.len(),
            manual_associations: events.iter().filter(|e| e.source.is_manual()).count(),
            auto_associations: events.iter().filter(|e| e.source == EventSource::Auto).count(),
            device_breakdown: BTreeMap::new(),
            phase_breakdown: Phase::ALL.iter().map(|p| (*p, 0)).collect(),
            type_breakdown: [PowerEventType::Peak, PowerEventType::Valley, PowerEventType::Start]
                .iter()
                .map(|t| (*t, 0))
                .collect(),
        };

        for event in events {
            *stats.device_breakdown.entry(event.device_id.clone()).or_insert(0) += 1;
            *stats.phase_breakdown.entry(event.phase).or_insert(0) += 1;
            *stats.type_breakdown.entry(event.trigger_type).or_insert(0) += 1;
        }
        stats
    }

    /// Pretty JSON backup; the event history is cut to the most recent entries
    pub fn export_tracking_data(&self) -> Result<String> {
        let history = &self.data.event_history;
        let keep = history.len().saturating_sub(self.config.export_history_limit);

        let export = TrackingExport {
            device_events: self.data.device_events.clone(),
            learning_data: self.data.learning_data.clone(),
            event_history: history[keep..].to_vec(),
            consumption_patterns: self.data.patterns.clone(),
            exported_at: chrono::Utc::now().to_rfc3339(),
            version: EXPORT_VERSION.to_string(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Replace the sections present in a backup. Legacy `deviceAssociations`
    /// are converted when no `deviceEvents` section is given.
    pub fn import_tracking_data(&mut self, json: &str) -> bool {
        let import: TrackingImport = match serde_json::from_str(json) {
            Ok(import) => import,
            Err(e) => {
                log::error!("Error importing tracking data: {}", e);
                return false;
            }
        };

        match (import.device_events, import.device_associations) {
            (Some(events), _) => self.data.device_events = events,
            (None, Some(legacy)) => {
                log::info!("Converting {} legacy associations", legacy.len());
                self.data.device_events = legacy.into_iter().map(LegacyAssociation::into_device_event).collect();
            }
            (None, None) => {}
        }
        if let Some(learning) = import.learning_data {
            self.data.learning_data = learning;
        }
        if let Some(mut history) = import.event_history {
            let excess = history.len().saturating_sub(self.config.history_limit);
            history.drain(..excess);
            self.data.event_history = history;
        }
        if let Some(patterns) = import.consumption_patterns {
            self.data.patterns = patterns;
        }

        self.save();
        true
    }

    /// Drop every tracking collection; the environment is left alone
    pub fn clear_tracking_data(&mut self) -> bool {
        self.data = TrackingData::default();

        let mut ok = true;
        for name in [DEVICE_EVENTS, LEARNING_DATA, EVENT_HISTORY, CONSUMPTION_PATTERNS] {
            if let Err(e) = self.store.remove(name) {
                log::error!("Failed to clear {}: {}", name, e);
                ok = false;
            }
        }
        log::info!("All tracking data cleared");
        ok
    }

    /// Hand the learning samples to the model once there are enough of them
    pub fn train_model(&mut self) -> bool {
        self.engine.train(&self.data.learning_data)
    }

    pub fn consumption_analysis(&self, range: TimeRange, now_ms: i64) -> ConsumptionAnalysis {
        analytics::consumption_analysis(&self.data.device_events, &self.environment.devices, range, now_ms)
    }

    /// Stored threshold episodes
    pub fn episodes(&self) -> Vec<ThresholdEpisode> {
        self.load_collection(CONSUMPTION_EPISODES)
    }

    /// Merge newly closed episodes into the stored list; returns how many
    /// stored episodes were replaced
    pub fn store_episodes(&self, fresh: Vec<ThresholdEpisode>) -> Result<usize> {
        let mut stored = self.episodes();
        let replaced = merge_episodes(&mut stored, fresh);
        self.store.persist(CONSUMPTION_EPISODES, &serde_json::to_string(&stored)?)?;
        Ok(replaced)
    }
}
