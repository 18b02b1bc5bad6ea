//! Appliance wattage reference table
//!
//! Maps an appliance type name to its expected consumption in watts. The table
//! is loaded once from a CSV file or an HTTP endpoint and handed to the
//! inference engine; when nothing can be loaded the engine falls back to its
//! hardcoded per-type ranges.

use crate::core::{Error, ReferenceConfig, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// How a reference entry was matched to a device type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Similar,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Similar => "similar",
        }
    }
}

/// Expected wattage found for a device type
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMatch {
    pub name: String,
    pub watts: f64,
    pub kind: MatchKind,
}

/// Loaded appliance reference table
#[derive(Debug, Clone, Default)]
pub struct ApplianceReference {
    /// Entries kept in file order so similar-name lookups are deterministic
    entries: Vec<(String, f64)>,
}

impl ApplianceReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut reference = Self::new();
        for (name, watts) in entries {
            reference.insert(name, watts);
        }
        reference
    }

    /// Add or replace an entry
    pub fn insert(&mut self, name: impl Into<String>, watts: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = watts,
            None => self.entries.push((name, watts)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact name match first, then the first key that contains or is
    /// contained in the device type (case-insensitive)
    pub fn lookup(&self, device_type: &str) -> Option<ReferenceMatch> {
        if let Some((name, watts)) = self.entries.iter().find(|(n, w)| n == device_type && *w > 0.0) {
            return Some(ReferenceMatch {
                name: name.clone(),
                watts: *watts,
                kind: MatchKind::Exact,
            });
        }

        let type_lower = device_type.to_lowercase();
        if type_lower.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .filter(|(_, w)| *w > 0.0)
            .find(|(n, _)| {
                let key = n.to_lowercase();
                key.contains(&type_lower) || type_lower.contains(&key)
            })
            .map(|(name, watts)| ReferenceMatch {
                name: name.clone(),
                watts: *watts,
                kind: MatchKind::Similar,
            })
    }

    pub fn to_map(&self) -> HashMap<String, f64> {
        self.entries.iter().cloned().collect()
    }

    /// Parse the `name,watts` CSV format (header line first). The name may
    /// itself contain commas, so each row is split on its last comma.
    pub fn parse_csv(content: &str) -> Self {
        let mut reference = Self::new();
        for line in content.trim().lines().skip(1) {
            let line = line.trim();
            let Some(idx) = line.rfind(',') else {
                continue;
            };
            let name = line[..idx].trim().trim_matches('"');
            let consumption = line[idx + 1..].trim();
            if name.is_empty() {
                continue;
            }
            match consumption.parse::<f64>() {
                Ok(watts) if watts.is_finite() => reference.insert(name, watts),
                _ => log::debug!("Skipping appliance row with bad wattage: {}", line),
            }
        }
        reference
    }
}

/// Source of the appliance reference table
pub trait ApplianceSource {
    /// Load the table; callers treat errors as "no reference available"
    fn load(&self) -> Result<ApplianceReference>;

    /// Name of this source for logs
    fn name(&self) -> String;
}

/// Reference table read from a CSV file
pub struct CsvApplianceFile {
    path: PathBuf,
}

impl CsvApplianceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ApplianceSource for CsvApplianceFile {
    fn load(&self) -> Result<ApplianceReference> {
        let content = fs::read_to_string(&self.path)?;
        Ok(ApplianceReference::parse_csv(&content))
    }

    fn name(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}

/// Reference table served as `{"appliances": {"name": watts, ...}}`
pub struct HttpApplianceEndpoint {
    url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct AppliancesResponse {
    #[serde(default)]
    appliances: HashMap<String, f64>,
}

impl HttpApplianceEndpoint {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl ApplianceSource for HttpApplianceEndpoint {
    fn load(&self) -> Result<ApplianceReference> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Reference(e.to_string()))?;

        let response = client
            .get(&self.url)
            .send()
            .map_err(|e| Error::Reference(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Reference(format!("HTTP {}", response.status())));
        }

        let body: AppliancesResponse = response
            .json()
            .map_err(|e| Error::Reference(e.to_string()))?;

        let mut names: Vec<_> = body.appliances.into_iter().collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ApplianceReference::from_entries(names))
    }

    fn name(&self) -> String {
        format!("http:{}", self.url)
    }
}

/// Build the sources named in the configuration, file first
pub fn sources_from_config(config: &ReferenceConfig) -> Vec<Box<dyn ApplianceSource>> {
    let mut sources: Vec<Box<dyn ApplianceSource>> = Vec::new();
    if let Some(path) = &config.appliances_csv {
        sources.push(Box::new(CsvApplianceFile::new(path.clone())));
    }
    if let Some(url) = &config.appliances_url {
        sources.push(Box::new(HttpApplianceEndpoint::new(
            url.clone(),
            Duration::from_secs(config.timeout_secs),
        )));
    }
    sources
}

/// Load the first source that yields a non-empty table.
///
/// Never fails: an unavailable reference degrades to an empty table.
pub fn load_reference(sources: &[Box<dyn ApplianceSource>]) -> ApplianceReference {
    for source in sources {
        match source.load() {
            Ok(reference) if !reference.is_empty() => {
                log::info!(
                    "Loaded {} appliances for device recognition from {}",
                    reference.len(),
                    source.name()
                );
                return reference;
            }
            Ok(_) => log::warn!("Appliance reference {} is empty", source.name()),
            Err(e) => log::warn!(
                "Failed to load appliance reference from {}: {}, using fallback patterns",
                source.name(),
                e
            ),
        }
    }
    ApplianceReference::new()
}
