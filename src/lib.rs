//! Meter Tracker library
//!
//! Detects power transitions in three-phase meter readings, attributes them
//! to registered appliances and keeps the resulting device events for
//! consumption analysis.

pub mod analytics;
pub mod core;
pub mod db;
pub mod detection;
pub mod inference;
pub mod patterns;
pub mod readings;
pub mod reference;
pub mod tracking;
