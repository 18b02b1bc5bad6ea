//! Core module - configuration, errors, and the shared meter/event types

mod config;
mod error;
mod records;
mod types;

pub use config::{Config, DetectionConfig, GeneralConfig, ReferenceConfig, TrackingConfig};
pub use error::{Error, Result};
pub use records::{
    local_time, DeviceEvent, DeviceEventType, EventSource, LearningFeatures, LearningSample,
    LegacyAssociation, PatternAnalysis, PowerEfficiency, TimeOfDay,
};
pub use types::{
    Device, EnvironmentConfig, Phase, PowerEvent, PowerEventType, Room, Sample,
};
