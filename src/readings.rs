//! Collector readings CSV
//!
//! Each row holds one reading of all three phases. A row becomes three
//! [`Sample`]s with raw readings keyed the way the scorers look them up
//! (`voltage_a`, `pf_b`, ...).

use crate::core::{Error, Phase, Result, Sample};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Collector column suffix and the normalized reading name it maps to
const MEASUREMENTS: [(&str, &str); 6] = [
    ("voltage", "voltage"),
    ("current", "current"),
    ("act_power", "apower"),
    ("aprt_power", "aprt_power"),
    ("angle", "angle"),
    ("pf", "pf"),
];

/// Read and parse a readings file
pub fn load_readings(path: &Path) -> Result<Vec<Sample>> {
    let content = fs::read_to_string(path)?;
    let samples = parse_readings(&content)?;
    log::info!("Loaded {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// Parse readings CSV text. Rows that cannot be used are skipped; a missing
/// header or timestamp column is an error.
pub fn parse_readings(content: &str) -> Result<Vec<Sample>> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| Error::InvalidInput("readings file is empty".to_string()))?
        .split(',')
        .map(|h| h.trim())
        .collect();

    let timestamp_col = header
        .iter()
        .position(|h| *h == "timestamp")
        .ok_or_else(|| Error::InvalidInput("readings header has no timestamp column".to_string()))?;

    let mut samples = Vec::new();
    for line in lines {
        let row: HashMap<&str, f64> = header
            .iter()
            .zip(line.split(','))
            .filter_map(|(h, v)| v.trim().parse::<f64>().ok().map(|v| (*h, v)))
            .collect();

        let Some(seconds) = line.split(',').nth(timestamp_col).and_then(|v| v.trim().parse::<f64>().ok()) else {
            log::debug!("Skipping reading without timestamp: {}", line);
            continue;
        };
        let timestamp = (seconds * 1000.0).round() as i64;

        samples.extend(Phase::ALL.iter().filter_map(|phase| phase_sample(&row, *phase, timestamp)));
    }
    Ok(samples)
}

fn phase_sample(row: &HashMap<&str, f64>, phase: Phase, timestamp: i64) -> Option<Sample> {
    let prefix = phase.key_suffix();
    let column = |name: &str| row.get(format!("{}_{}", prefix, name).as_str()).copied();

    let mut readings: HashMap<String, f64> = MEASUREMENTS
        .iter()
        .filter_map(|&(col, key)| column(col).map(|v| (phase.reading_key(key), v)))
        .collect();
    if let Some(neutral) = row.get("n_current") {
        readings.insert("current_n".to_string(), *neutral);
    }

    let power = match (column("act_power"), column("voltage"), column("current")) {
        (Some(active), _, _) => active,
        (None, Some(voltage), Some(current)) => voltage * current,
        _ => return None,
    };

    Some(Sample::new(phase, timestamp, power).with_readings(readings))
}
