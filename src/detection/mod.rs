//! Event detection on the per-phase power stream
//!
//! Every incoming sample re-evaluates its predecessor with the three-sample
//! node classifier (one sample of lag). Finalized peaks and valleys with a
//! large enough step become [`PowerEvent`]s for the inference engine. The
//! same samples also drive the threshold segmenter.

pub mod node;
pub mod segmenter;

use crate::core::{DetectionConfig, Phase, PowerEvent, PowerEventType, Sample};
use std::collections::BTreeMap;

pub use node::{classify_node, classify_series, NodeType};
pub use segmenter::{merge_episodes, EpisodeType, ThresholdEpisode, ThresholdSegmenter, Trend};

/// Label assigned to a sample
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub phase: Phase,
    pub timestamp: i64,
    pub power: f64,
    pub node_type: NodeType,
    /// The newest sample is always labeled normal until its successor arrives
    pub provisional: bool,
}

/// Everything produced by one sample
#[derive(Debug, Default)]
pub struct DetectorOutput {
    pub nodes: Vec<NodeUpdate>,
    pub events: Vec<PowerEvent>,
    pub episode: Option<ThresholdEpisode>,
}

#[derive(Debug, Default)]
struct PhaseWindow {
    prev: Option<Sample>,
    current: Option<Sample>,
}

/// Streaming detector over all three phases
pub struct EventDetector {
    min_event_delta: f64,
    windows: BTreeMap<Phase, PhaseWindow>,
    segmenter: ThresholdSegmenter,
}

impl EventDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            min_event_delta: config.min_event_delta_watts,
            windows: BTreeMap::new(),
            segmenter: ThresholdSegmenter::new(config),
        }
    }

    /// Feed one sample. Samples not newer than the last one seen on the same
    /// phase are dropped.
    pub fn push(&mut self, sample: Sample) -> DetectorOutput {
        let mut output = DetectorOutput::default();
        let window = self.windows.entry(sample.phase).or_default();

        if let Some(last) = &window.current {
            if sample.timestamp <= last.timestamp {
                log::warn!(
                    "Dropping out-of-order sample on phase {} ({} <= {})",
                    sample.phase,
                    sample.timestamp,
                    last.timestamp
                );
                return output;
            }
        }

        if let (Some(prev), Some(current)) = (&window.prev, &window.current) {
            let node_type = classify_node(prev.power, current.power, sample.power);
            output.nodes.push(NodeUpdate {
                phase: current.phase,
                timestamp: current.timestamp,
                power: current.power,
                node_type,
                provisional: false,
            });

            let delta = current.power - prev.power;
            if node_type.is_turning_point() && delta.abs() >= self.min_event_delta {
                let event_type = match node_type {
                    NodeType::Valley => PowerEventType::Valley,
                    _ => PowerEventType::Peak,
                };
                log::debug!(
                    "Detected {} on phase {}: {:+.1}W at {}",
                    event_type,
                    current.phase,
                    delta,
                    current.timestamp
                );
                output.events.push(
                    PowerEvent::new(event_type, current.phase, delta, current.power, current.timestamp)
                        .with_readings(current.raw_readings.clone()),
                );
            }
        }

        output.nodes.push(NodeUpdate {
            phase: sample.phase,
            timestamp: sample.timestamp,
            power: sample.power,
            node_type: NodeType::Normal,
            provisional: true,
        });

        output.episode = self.segmenter.push(&sample);

        window.prev = window.current.take();
        window.current = Some(sample);
        output
    }

    /// End of stream: close open episodes at `end_time`. The last sample of
    /// each phase keeps its normal label.
    pub fn finish(&mut self, end_time: i64) -> Vec<ThresholdEpisode> {
        self.windows.clear();
        self.segmenter.finish(end_time)
    }

    pub fn segmenter(&self) -> &ThresholdSegmenter {
        &self.segmenter
    }
}
