//! Database module for durable tracker state
//!
//! Uses SQLite for local storage of:
//! - Named JSON collections (associations, learning data, history, patterns, episodes)
//! - The append-only raw sample log

use crate::core::{Config, Phase, Result, Sample};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Durable key-value storage for tracker collections
///
/// A missing collection is not an error: `load` returns `None` and the caller
/// falls back to defaults.
pub trait Persistence {
    /// Replace the contents of one collection
    fn persist(&self, collection: &str, data: &str) -> Result<()>;

    /// Replace several collections at once; either all are written or none
    fn persist_batch(&self, entries: &[(&str, String)]) -> Result<()>;

    /// Read a collection, `None` when it has never been written
    fn load(&self, collection: &str) -> Result<Option<String>>;

    /// Drop a collection
    fn remove(&self, collection: &str) -> Result<()>;
}

/// Database manager
pub struct Database {
    conn: Connection,
}

/// Raw sample database record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub id: i64,
    pub phase: String,
    pub timestamp: i64,
    pub power: f64,
    pub readings: Option<String>,
}

impl SampleRecord {
    /// Convert back into a sample, skipping rows with an unknown phase
    pub fn into_sample(self) -> Option<Sample> {
        let phase = match self.phase.as_str() {
            "A" => Phase::A,
            "B" => Phase::B,
            "C" => Phase::C,
            _ => return None,
        };
        let readings: HashMap<String, f64> = self
            .readings
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
            .unwrap_or_default();
        Some(Sample::new(phase, self.timestamp, self.power).with_readings(readings))
    }
}

impl Database {
    /// Open the database in the configured data directory
    pub fn new(config: &Config) -> Result<Self> {
        let db_path = config.data_dir()?.join("data.db");
        Self::open(&db_path)
    }

    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Named JSON collections
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Raw per-phase samples, append only
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phase TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                power REAL NOT NULL,
                readings TEXT
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp);
            "#,
        )?;

        Ok(())
    }

    /// Append a sample to the raw log
    pub fn insert_sample(&self, sample: &Sample) -> Result<()> {
        let readings_json = if sample.raw_readings.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&sample.raw_readings)?)
        };

        self.conn.execute(
            "INSERT INTO samples (phase, timestamp, power, readings) VALUES (?1, ?2, ?3, ?4)",
            params![sample.phase.as_str(), sample.timestamp, sample.power, readings_json],
        )?;

        Ok(())
    }

    /// Append many samples in one transaction
    pub fn insert_samples(&self, samples: &[Sample]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for sample in samples {
            let readings_json = if sample.raw_readings.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&sample.raw_readings)?)
            };
            tx.execute(
                "INSERT INTO samples (phase, timestamp, power, readings) VALUES (?1, ?2, ?3, ?4)",
                params![sample.phase.as_str(), sample.timestamp, sample.power, readings_json],
            )?;
        }
        tx.commit()?;
        Ok(samples.len())
    }

    /// Get samples for a time range (ms, inclusive), ordered by time
    pub fn get_samples(&self, start: i64, end: i64) -> Result<Vec<SampleRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, phase, timestamp, power, readings
             FROM samples
             WHERE timestamp >= ?1 AND timestamp <= ?2
             ORDER BY timestamp ASC, id ASC",
        )?;

        let samples = stmt
            .query_map(params![start, end], |row| {
                Ok(SampleRecord {
                    id: row.get(0)?,
                    phase: row.get(1)?,
                    timestamp: row.get(2)?,
                    power: row.get(3)?,
                    readings: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(samples)
    }

    /// Get total samples count
    pub fn get_samples_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Names of the collections currently stored
    pub fn collection_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM collections ORDER BY name ASC")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }
}

impl Persistence for Database {
    fn persist(&self, collection: &str, data: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn.execute(
            r#"INSERT INTO collections (name, data, updated_at)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(name) DO UPDATE SET
                   data = ?2,
                   updated_at = ?3"#,
            params![collection, data, now],
        )?;
        Ok(())
    }

    fn persist_batch(&self, entries: &[(&str, String)]) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let tx = self.conn.unchecked_transaction()?;
        for (collection, data) in entries {
            tx.execute(
                r#"INSERT INTO collections (name, data, updated_at)
                   VALUES (?1, ?2, ?3)
                   ON CONFLICT(name) DO UPDATE SET
                       data = ?2,
                       updated_at = ?3"#,
                params![collection, data, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load(&self, collection: &str) -> Result<Option<String>> {
        let data = self
            .conn
            .query_row(
                "SELECT data FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    fn remove(&self, collection: &str) -> Result<()> {
        self.conn.execute("DELETE FROM collections WHERE name = ?1", params![collection])?;
        Ok(())
    }
}
