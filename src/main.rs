//! Meter Tracker - command line entry point
//!
//! Replays collector readings through the detector and inference engine and
//! gives access to the stored tracking data.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use meter_tracker_lib::analytics::TimeRange;
use meter_tracker_lib::core::Config;
use meter_tracker_lib::db::Database;
use meter_tracker_lib::detection::{EventDetector, ThresholdEpisode};
use meter_tracker_lib::readings::load_readings;
use meter_tracker_lib::reference::{load_reference, sources_from_config};
use meter_tracker_lib::tracking::DeviceTracker;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "meter-tracker", version, about = "Three-phase meter event tracker")]
struct Cli {
    /// Config file, defaults to the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a readings CSV through the detector and print suggestions
    Replay {
        file: PathBuf,
        /// Record the top suggestion when it reaches the confidence threshold
        #[arg(long)]
        record: bool,
    },
    /// Suggest devices for a single power event given as JSON
    Analyze { event: String },
    /// Per-device consumption over a time range
    Analysis {
        #[arg(long, default_value = "24h")]
        range: String,
    },
    /// Association counts
    Stats,
    /// Print a JSON backup of the tracking data
    Export,
    /// Restore tracking data from a JSON backup
    Import { file: PathBuf },
    /// Delete all tracking data
    Clear,
    /// Train the learning model from recorded events
    Train,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.general.log_level.as_str()))
        .init();

    log::info!("Starting Meter Tracker v{}", env!("CARGO_PKG_VERSION"));

    let reference = load_reference(&sources_from_config(&config.reference));
    let store = Database::new(&config).context("Failed to open database")?;
    let mut tracker = DeviceTracker::new(Box::new(store), &config, reference);

    match cli.command {
        Command::Replay { file, record } => replay(&config, &mut tracker, &file, record)?,
        Command::Analyze { event } => {
            let suggestions = tracker.analyze_event_json(&event);
            println!("{}", serde_json::to_string_pretty(&suggestions)?);
        }
        Command::Analysis { range } => {
            let range: TimeRange = range.parse()?;
            let analysis = tracker.consumption_analysis(range, chrono::Utc::now().timestamp_millis());
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Command::Stats => println!("{}", serde_json::to_string_pretty(&tracker.tracking_stats())?),
        Command::Export => println!("{}", tracker.export_tracking_data()?),
        Command::Import { file } => {
            let json = fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            if !tracker.import_tracking_data(&json) {
                bail!("{} is not a valid tracking backup", file.display());
            }
            println!("Imported tracking data from {}", file.display());
        }
        Command::Clear => {
            if !tracker.clear_tracking_data() {
                bail!("Some tracking collections could not be cleared");
            }
            println!("All tracking data cleared");
        }
        Command::Train => {
            let trained = tracker.train_model();
            println!("Model {}: {}", tracker.engine().model_name(), if trained { "trained" } else { "not trained" });
        }
    }

    Ok(())
}

fn replay(config: &Config, tracker: &mut DeviceTracker, file: &Path, record: bool) -> anyhow::Result<()> {
    let mut samples = load_readings(file)?;
    samples.sort_by_key(|s| s.timestamp);

    let log_db = Database::new(config)?;
    let stored = log_db.insert_samples(&samples)?;
    log::info!("Stored {} samples", stored);

    let threshold = config.tracking.confidence_threshold;
    let mut detector = EventDetector::new(&config.detection);
    let mut episodes: Vec<ThresholdEpisode> = Vec::new();
    let mut detected = 0;
    let mut recorded = 0;

    for sample in samples.iter().cloned() {
        let output = detector.push(sample);
        episodes.extend(output.episode);

        for event in output.events {
            detected += 1;
            let suggestions = tracker.analyze_event(&event);
            tracker.add_event_to_history(event.clone());

            let Some(top) = suggestions.first() else {
                println!("{} {} {:+.1}W: no suggestion", event.phase, event.event_type, event.power_delta);
                continue;
            };
            println!(
                "{} {} {:+.1}W: {} ({:.2}) {}",
                event.phase,
                event.event_type,
                event.power_delta,
                top.device.id,
                top.confidence,
                top.reasoning.join("; ")
            );

            if record && top.confidence >= threshold {
                let device_id = top.device.id.clone();
                match tracker.record_auto_device_event(&device_id, &event, None, top.confidence) {
                    Ok(_) => recorded += 1,
                    Err(e) => log::warn!("Could not record {} for {}: {}", event.event_type, device_id, e),
                }
            }
        }
    }

    if let Some(last) = samples.last() {
        episodes.extend(detector.finish(last.timestamp));
    }
    let closed = episodes.len();
    let replaced = tracker.store_episodes(episodes)?;

    println!(
        "Replayed {} samples: {} events, {} recorded, {} episodes ({} replaced)",
        samples.len(),
        detected,
        recorded,
        closed,
        replaced
    );
    Ok(())
}
