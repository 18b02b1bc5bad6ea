//! Configuration management

use crate::core::{EnvironmentConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

impl Config {
    /// Application directory under the platform config dir
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

        let app_config_dir = config_dir.join("meter-tracker");

        if !app_config_dir.exists() {
            fs::create_dir_all(&app_config_dir)?;
        }

        Ok(app_config_dir)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, writing defaults on first run
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            let config = Self::default();
            config.save_to(&path)?;
            return Ok(config);
        }

        Self::load_from(&path)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Directory holding the database, defaults to the platform data dir
    pub fn data_dir(&self) -> Result<PathBuf> {
        let dir = match &self.general.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?
                .join("meter-tracker"),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if d.low_threshold_watts >= d.medium_threshold_watts {
            return Err(Error::Config(format!(
                "low threshold ({}W) must be below medium threshold ({}W)",
                d.low_threshold_watts, d.medium_threshold_watts
            )));
        }
        if self.tracking.history_limit == 0 {
            return Err(Error::Config("history_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Override for the database directory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Default log filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_level: default_log_level(),
        }
    }
}

/// Event detector and episode segmenter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Power above which an episode opens, and at or below which it closes
    #[serde(default = "default_noise_floor")]
    pub noise_floor_watts: f64,
    /// Minimum sample-to-sample change that flips an episode trend
    #[serde(default = "default_trend_delta")]
    pub trend_delta_watts: f64,
    /// Episodes peaking at or below this are LOW
    #[serde(default = "default_low_threshold")]
    pub low_threshold_watts: f64,
    /// Episodes peaking at or below this (and above low) are MEDIUM
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold_watts: f64,
    /// Minimum |delta| for a peak/valley node to be emitted as a power event
    #[serde(default = "default_min_event_delta")]
    pub min_event_delta_watts: f64,
}

fn default_noise_floor() -> f64 { 10.0 }
fn default_trend_delta() -> f64 { 5.0 }
fn default_low_threshold() -> f64 { 300.0 }
fn default_medium_threshold() -> f64 { 1000.0 }
fn default_min_event_delta() -> f64 { 50.0 }

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            noise_floor_watts: default_noise_floor(),
            trend_delta_watts: default_trend_delta(),
            low_threshold_watts: default_low_threshold(),
            medium_threshold_watts: default_medium_threshold(),
            min_event_delta_watts: default_min_event_delta(),
        }
    }
}

/// Association store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Raw event history cap (oldest dropped first)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// History entries included in exports
    #[serde(default = "default_export_history_limit")]
    pub export_history_limit: usize,
    /// Window for complementary-event correlation (ms)
    #[serde(default = "default_correlation_window")]
    pub correlation_window_ms: i64,
    /// Seed new consumption patterns from the appliance reference wattage
    #[serde(default)]
    pub seed_patterns_from_reference: bool,
    /// Learning samples required before the model hook is trained
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,
    /// Top suggestion confidence at which replayed events are recorded automatically
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_history_limit() -> usize { 1000 }
fn default_export_history_limit() -> usize { 100 }
fn default_correlation_window() -> i64 { 5000 }
fn default_min_training_samples() -> usize { 50 }
fn default_confidence_threshold() -> f64 { 0.7 }

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            export_history_limit: default_export_history_limit(),
            correlation_window_ms: default_correlation_window(),
            seed_patterns_from_reference: false,
            min_training_samples: default_min_training_samples(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// Where to find the appliance wattage reference table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// CSV file with `name,watts` rows
    #[serde(default)]
    pub appliances_csv: Option<PathBuf>,
    /// HTTP endpoint returning `{"appliances": {...}}`
    #[serde(default)]
    pub appliances_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 { 5 }

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            appliances_csv: None,
            appliances_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Phase;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.detection.noise_floor_watts, 10.0);
        assert_eq!(config.detection.low_threshold_watts, 300.0);
        assert_eq!(config.detection.medium_threshold_watts, 1000.0);
        assert_eq!(config.tracking.history_limit, 1000);
        assert_eq!(config.tracking.correlation_window_ms, 5000);
        assert!(config.environment.devices.is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let content = r#"
            [detection]
            low_threshold_watts = 200.0

            [[environment.devices]]
            id = "ac-living"
            name = "Living room AC"
            type = "split"
            phase = "A"
            peakPower = 2000.0
            averagePower = 1500.0
        "#;

        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.detection.low_threshold_watts, 200.0);
        assert_eq!(config.detection.medium_threshold_watts, 1000.0);
        assert_eq!(config.environment.devices.len(), 1);
        assert_eq!(config.environment.devices[0].phase, Phase::A);
        assert_eq!(config.environment.devices[0].device_type, "split");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.tracking.seed_patterns_from_reference = true;
        config.reference.appliances_url = Some("http://localhost:3000/api/get-appliances".into());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!(loaded.tracking.seed_patterns_from_reference);
        assert_eq!(loaded.reference.appliances_url, config.reference.appliances_url);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[detection]\nlow_threshold_watts = 1200.0\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
