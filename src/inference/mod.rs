//! Device inference engine
//!
//! Scores the devices registered on an event's phase with independent
//! signals, then merges the per-device results:
//! - consumption-pattern shape (`pattern_enhanced`)
//! - local heuristics: step magnitude, reference wattage, time of day and
//!   recent complementary activity (`local`)
//! - previously recorded device events (`pattern`)
//! - the learning model, when one is plugged in (`model`)

pub mod model;
pub mod scoring;

use crate::core::{local_time, Device, DeviceEvent, LearningSample, PowerEvent, TrackingConfig};
use crate::patterns::PatternBook;
use crate::reference::ApplianceReference;
use chrono::Timelike;

pub use model::{LearningModel, NoopModel};
pub use scoring::{Algorithm, PatternType, Suggestion};

/// Maximum suggestions returned for one event
pub const MAX_SUGGESTIONS: usize = 5;
/// Local suggestions at or below this summed score are dropped
const LOCAL_MIN_CONFIDENCE: f64 = 0.1;
/// Pattern-shape suggestions at or below this score are dropped
const PATTERN_MIN_CONFIDENCE: f64 = 0.3;

/// Tracker state the engine reads while scoring one event
pub struct InferenceContext<'a> {
    /// Every registered device; the engine filters by phase
    pub devices: &'a [Device],
    /// Created lazily for devices seen for the first time
    pub patterns: &'a mut PatternBook,
    pub history: &'a [PowerEvent],
    pub device_events: &'a [DeviceEvent],
}

pub struct InferenceEngine {
    reference: ApplianceReference,
    model: Box<dyn LearningModel>,
    seed_from_reference: bool,
    correlation_window_ms: i64,
    min_training_samples: usize,
}

impl InferenceEngine {
    pub fn new(reference: ApplianceReference, config: &TrackingConfig) -> Self {
        Self {
            reference,
            model: Box::new(NoopModel),
            seed_from_reference: config.seed_patterns_from_reference,
            correlation_window_ms: config.correlation_window_ms,
            min_training_samples: config.min_training_samples,
        }
    }

    pub fn with_model(mut self, model: Box<dyn LearningModel>) -> Self {
        self.model = model;
        self
    }

    pub fn reference(&self) -> &ApplianceReference {
        &self.reference
    }

    /// Swap in a freshly loaded reference table
    pub fn set_reference(&mut self, reference: ApplianceReference) {
        log::info!("Appliance reference replaced ({} entries)", reference.len());
        self.reference = reference;
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Ranked suggestions for an event, at most [`MAX_SUGGESTIONS`]
    pub fn analyze(&self, event: &PowerEvent, ctx: InferenceContext<'_>) -> Vec<Suggestion> {
        if let Err(e) = event.validate() {
            log::warn!("Ignoring invalid power event: {}", e);
            return Vec::new();
        }

        let candidates: Vec<Device> = ctx
            .devices
            .iter()
            .filter(|d| d.phase == event.phase)
            .cloned()
            .collect();
        if candidates.is_empty() {
            log::debug!("No devices registered on phase {}", event.phase);
            return Vec::new();
        }

        let mut suggestions = self.pattern_analysis(event, &candidates, ctx.patterns);
        suggestions.extend(self.local_analysis(event, &candidates, ctx.history));
        suggestions.extend(self.historical_analysis(event, &candidates, ctx.device_events));
        suggestions.extend(self.model.suggest(event, &candidates));

        let mut ranked = scoring::consolidate(suggestions);
        ranked.truncate(MAX_SUGGESTIONS);
        log::debug!(
            "{} suggestion(s) for {} on phase {} ({:+.1}W)",
            ranked.len(),
            event.event_type,
            event.phase,
            event.power_delta
        );
        ranked
    }

    /// Match the event shape against each candidate's consumption pattern
    pub fn pattern_analysis(
        &self,
        event: &PowerEvent,
        candidates: &[Device],
        patterns: &mut PatternBook,
    ) -> Vec<Suggestion> {
        let pattern_type = scoring::classify_pattern(event);
        if pattern_type == PatternType::Unknown {
            return Vec::new();
        }

        let reference = self.seed_from_reference.then_some(&self.reference);
        candidates
            .iter()
            .filter_map(|device| {
                let pattern = patterns.get_or_create(device, reference);
                let confidence = scoring::match_pattern(event, pattern, pattern_type);
                if confidence <= PATTERN_MIN_CONFIDENCE {
                    return None;
                }
                let mut suggestion = Suggestion::new(
                    device.clone(),
                    confidence,
                    vec![format!(
                        "Consumption pattern match: {} ({:.2})",
                        pattern_type.as_str(),
                        confidence
                    )],
                    Algorithm::PatternEnhanced,
                );
                suggestion.pattern_type = Some(pattern_type);
                Some(suggestion)
            })
            .collect()
    }

    /// Sum of the local heuristic signals per candidate, capped at 1.0
    pub fn local_analysis(&self, event: &PowerEvent, candidates: &[Device], history: &[PowerEvent]) -> Vec<Suggestion> {
        let hour = local_time(event.timestamp).map(|t| t.hour());

        candidates
            .iter()
            .filter_map(|device| {
                let type_score = scoring::reference_type_score(&device.device_type, event, &self.reference)
                    .unwrap_or_else(|| scoring::fallback_type_score(&device.device_type, event));

                let mut parts = vec![scoring::power_magnitude_score(event, device), type_score];
                if let Some(hour) = hour {
                    parts.push(scoring::time_of_day_score(&device.device_type, hour));
                }
                parts.push(scoring::recent_activity_score(event, history, self.correlation_window_ms));

                let confidence: f64 = parts.iter().map(|p| p.score).sum();
                if confidence <= LOCAL_MIN_CONFIDENCE {
                    return None;
                }
                let reasoning = parts.into_iter().filter_map(|p| p.reasoning).collect();
                Some(Suggestion::new(
                    device.clone(),
                    confidence.min(1.0),
                    reasoning,
                    Algorithm::Local,
                ))
            })
            .collect()
    }

    /// Candidates previously recorded for similar transitions
    pub fn historical_analysis(
        &self,
        event: &PowerEvent,
        candidates: &[Device],
        device_events: &[DeviceEvent],
    ) -> Vec<Suggestion> {
        scoring::historical_matches(event, device_events)
            .into_iter()
            .filter_map(|m| {
                let device = candidates.iter().find(|d| d.id == m.device_id)?;
                Some(Suggestion::new(
                    device.clone(),
                    m.confidence,
                    vec![format!("Historical pattern match ({} similar events)", m.occurrences)],
                    Algorithm::Pattern,
                ))
            })
            .collect()
    }

    /// Train the learning model once enough samples exist
    pub fn train(&mut self, samples: &[LearningSample]) -> bool {
        if samples.len() < self.min_training_samples {
            log::info!(
                "Insufficient data for model training: {} of {} samples",
                samples.len(),
                self.min_training_samples
            );
            return false;
        }
        self.model.train(samples)
    }
}
