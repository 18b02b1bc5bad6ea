//! Threshold segmentation of per-phase power into consumption episodes
//!
//! An episode opens when phase power rises above the noise floor and closes
//! on the first sample at or below it. Its class is decided by the highest
//! power reached while it was open.

use crate::core::{DetectionConfig, Phase, Sample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Consumption class of a closed episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EpisodeType {
    Low,
    Medium,
    High,
}

impl EpisodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeType::Low => "LOW",
            EpisodeType::Medium => "MEDIUM",
            EpisodeType::High => "HIGH",
        }
    }
}

/// Direction of the last significant change inside an open episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
}

/// A closed consumption episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdEpisode {
    pub id: u64,
    pub phase: Phase,
    #[serde(rename = "type")]
    pub episode_type: EpisodeType,
    /// ms
    pub start_time: i64,
    /// ms
    pub end_time: i64,
    /// ms
    pub duration: i64,
    pub min_power: f64,
    pub max_power: f64,
    pub average_power: f64,
    /// Wh
    pub total_energy: f64,
}

/// Running state of the episode currently open on a phase
#[derive(Debug, Clone, PartialEq)]
pub struct OpenEpisode {
    pub id: u64,
    pub start_time: i64,
    pub min_power: f64,
    pub max_power: f64,
    pub total_power: f64,
    pub data_points: u32,
    pub last_power: f64,
    pub trend: Trend,
}

/// Per-phase threshold segmenter
pub struct ThresholdSegmenter {
    noise_floor: f64,
    trend_delta: f64,
    low_threshold: f64,
    medium_threshold: f64,
    open: BTreeMap<Phase, OpenEpisode>,
    next_id: u64,
}

impl ThresholdSegmenter {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            noise_floor: config.noise_floor_watts,
            trend_delta: config.trend_delta_watts,
            low_threshold: config.low_threshold_watts,
            medium_threshold: config.medium_threshold_watts,
            open: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Feed one sample; returns the episode it closed, if any
    pub fn push(&mut self, sample: &Sample) -> Option<ThresholdEpisode> {
        let power = sample.power;

        let Some(episode) = self.open.get_mut(&sample.phase) else {
            if power > self.noise_floor {
                self.next_id += 1;
                self.open.insert(
                    sample.phase,
                    OpenEpisode {
                        id: self.next_id,
                        start_time: sample.timestamp,
                        min_power: power,
                        max_power: power,
                        total_power: power,
                        data_points: 1,
                        last_power: power,
                        trend: Trend::Rising,
                    },
                );
                log::debug!("Episode {} opened on phase {} at {:.1}W", self.next_id, sample.phase, power);
            }
            return None;
        };

        episode.min_power = episode.min_power.min(power);
        episode.max_power = episode.max_power.max(power);
        episode.total_power += power;
        episode.data_points += 1;

        let diff = power - episode.last_power;
        if diff.abs() > self.trend_delta {
            episode.trend = if diff > 0.0 { Trend::Rising } else { Trend::Falling };
        }
        episode.last_power = power;

        if power <= self.noise_floor {
            return self.close(sample.phase, sample.timestamp);
        }
        None
    }

    /// Close every open episode at `end_time` (end of stream)
    pub fn finish(&mut self, end_time: i64) -> Vec<ThresholdEpisode> {
        let phases: Vec<Phase> = self.open.keys().copied().collect();
        phases
            .into_iter()
            .filter_map(|phase| self.close(phase, end_time))
            .collect()
    }

    pub fn open_episode(&self, phase: Phase) -> Option<&OpenEpisode> {
        self.open.get(&phase)
    }

    fn close(&mut self, phase: Phase, end_time: i64) -> Option<ThresholdEpisode> {
        let episode = self.open.remove(&phase)?;

        let duration = end_time - episode.start_time;
        let average_power = episode.total_power / episode.data_points as f64;
        let episode_type = self.classify(episode.max_power);

        let closed = ThresholdEpisode {
            id: episode.id,
            phase,
            episode_type,
            start_time: episode.start_time,
            end_time,
            duration,
            min_power: episode.min_power,
            max_power: episode.max_power,
            average_power,
            total_energy: average_power * duration as f64 / 3_600_000.0,
        };
        log::debug!(
            "Episode {} closed on phase {}: {} {:.3}Wh over {}ms",
            closed.id,
            phase,
            episode_type.as_str(),
            closed.total_energy,
            duration
        );
        Some(closed)
    }

    fn classify(&self, max_power: f64) -> EpisodeType {
        if max_power <= self.low_threshold {
            EpisodeType::Low
        } else if max_power <= self.medium_threshold {
            EpisodeType::Medium
        } else {
            EpisodeType::High
        }
    }
}

/// Merge freshly closed episodes into a stored list.
///
/// An episode with the same phase, start and end as a stored one replaces it.
/// Appended episodes whose id collides with the stored range are renumbered
/// after the highest stored id. Returns the number of replacements.
pub fn merge_episodes(stored: &mut Vec<ThresholdEpisode>, fresh: Vec<ThresholdEpisode>) -> usize {
    let max_stored_id = stored.iter().map(|e| e.id).max().unwrap_or(0);
    let mut next_id = max_stored_id;
    let mut replaced = 0;

    for mut episode in fresh {
        let existing = stored.iter().position(|e| {
            e.phase == episode.phase
                && e.start_time == episode.start_time
                && e.end_time == episode.end_time
        });

        match existing {
            Some(index) => {
                log::debug!(
                    "Replaced episode {} with {} on phase {}",
                    stored[index].id,
                    episode.id,
                    episode.phase
                );
                stored[index] = episode;
                replaced += 1;
            }
            None => {
                if episode.id <= max_stored_id {
                    next_id += 1;
                    episode.id = next_id;
                } else {
                    next_id = next_id.max(episode.id);
                }
                stored.push(episode);
            }
        }
    }

    replaced
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(segmenter: &mut ThresholdSegmenter, phase: Phase, powers: &[f64]) -> Vec<ThresholdEpisode> {
        powers
            .iter()
            .enumerate()
            .filter_map(|(i, p)| segmenter.push(&Sample::new(phase, i as i64 * 1000, *p)))
            .collect()
    }

    #[test]
    fn test_episode_lifecycle_and_energy() {
        let mut segmenter = ThresholdSegmenter::new(&DetectionConfig::default());
        let episodes = feed(&mut segmenter, Phase::A, &[0.0, 100.0, 200.0, 300.0, 0.0]);

        assert_eq!(episodes.len(), 1);
        let episode = &episodes[0];
        assert_eq!(episode.start_time, 1000);
        assert_eq!(episode.end_time, 4000);
        assert_eq!(episode.duration, 3000);
        assert_eq!(episode.min_power, 0.0);
        assert_eq!(episode.max_power, 300.0);
        // closing sample is part of the average
        assert_eq!(episode.average_power, 150.0);
        assert_eq!(episode.total_energy, 150.0 * 3000.0 / 3_600_000.0);
        assert_eq!(episode.episode_type, EpisodeType::Low);
    }

    #[test]
    fn test_type_depends_on_max_power_only() {
        let mut segmenter = ThresholdSegmenter::new(&DetectionConfig::default());

        let medium = feed(&mut segmenter, Phase::B, &[20.0, 301.0, 20.0, 5.0]);
        assert_eq!(medium[0].episode_type, EpisodeType::Medium);

        // mostly low power, one spike
        let high = feed(&mut segmenter, Phase::B, &[50.0, 50.0, 1001.0, 50.0, 50.0, 0.0]);
        assert_eq!(high[0].episode_type, EpisodeType::High);
        assert!(high[0].average_power < 300.0);

        let boundary = feed(&mut segmenter, Phase::B, &[1000.0, 0.0]);
        assert_eq!(boundary[0].episode_type, EpisodeType::Medium);
    }

    #[test]
    fn test_noise_floor_and_trend() {
        let mut segmenter = ThresholdSegmenter::new(&DetectionConfig::default());

        assert!(segmenter.push(&Sample::new(Phase::C, 0, 10.0)).is_none());
        assert!(segmenter.open_episode(Phase::C).is_none());

        segmenter.push(&Sample::new(Phase::C, 1000, 500.0));
        segmenter.push(&Sample::new(Phase::C, 2000, 497.0));
        assert_eq!(segmenter.open_episode(Phase::C).unwrap().trend, Trend::Rising);

        segmenter.push(&Sample::new(Phase::C, 3000, 400.0));
        assert_eq!(segmenter.open_episode(Phase::C).unwrap().trend, Trend::Falling);
    }

    #[test]
    fn test_finish_force_closes() {
        let mut segmenter = ThresholdSegmenter::new(&DetectionConfig::default());
        segmenter.push(&Sample::new(Phase::A, 0, 1500.0));
        segmenter.push(&Sample::new(Phase::B, 0, 80.0));

        let closed = segmenter.finish(60_000);
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|e| e.end_time == 60_000 && e.duration == 60_000));
        assert!(segmenter.open_episode(Phase::A).is_none());
        assert_eq!(closed[0].id, 1);
        assert_eq!(closed[1].id, 2);
    }

    #[test]
    fn test_merge_replaces_same_interval() {
        let mut segmenter = ThresholdSegmenter::new(&DetectionConfig::default());
        let mut stored = feed(&mut segmenter, Phase::A, &[0.0, 400.0, 0.0]);
        assert_eq!(stored[0].id, 1);

        let mut rerun = ThresholdSegmenter::new(&DetectionConfig::default());
        let fresh = feed(&mut rerun, Phase::A, &[0.0, 450.0, 0.0, 0.0, 80.0, 0.0]);
        assert_eq!(fresh.len(), 2);

        let replaced = merge_episodes(&mut stored, fresh);
        assert_eq!(replaced, 1);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].max_power, 450.0);
        assert_eq!(stored[1].id, 2);
    }
}
