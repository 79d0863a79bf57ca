use anyhow::Result;
use std::time::Instant;
use log::{info, warn};

// Define modules used by main
mod conformations;
mod driver;
mod engine;
mod forces;
mod integrator;
mod reporter;

use polymer_common::SimulationConfig;

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting Polymer Ensemble Driver...");

    // --- Load Configuration ---
    // All parameters live in ensemble.toml; without it, the built-in
    // reference parameter set is used.
    let config = match SimulationConfig::load("ensemble.toml") {
        Ok(config) => config,
        Err(e) => {
            warn!("Could not load ensemble.toml ({}). Using built-in defaults.", e);
            SimulationConfig::default()
        }
    };

    info!("Using {} Rayon threads.", rayon::current_num_threads());
    info!(
        "Ensemble: {} total runs, device {}, {} blocks x {} steps per run.",
        config.ensemble.total_runs,
        config.ensemble.device_id,
        config.integration.total_blocks,
        config.integration.block_size
    );

    // --- Ensemble Loop ---
    let start_time = Instant::now();
    let summaries = driver::orchestrate(&config)?;
    let total_duration = start_time.elapsed();

    info!(
        "Ensemble finished: {} run(s) in {:.3} seconds ({:.3} minutes).",
        summaries.len(),
        total_duration.as_secs_f64(),
        total_duration.as_secs_f64() / 60.0
    );

    // --- Save Ensemble Summary ---
    if let Some(path) = config.ensemble.summary_path.as_deref() {
        match driver::write_ensemble_summary(std::path::Path::new(path), &summaries) {
            Ok(()) => info!("Ensemble summary saved to {}", path),
            Err(e) => log::error!("Error saving ensemble summary '{}': {}", path, e),
        }
    } else {
        info!("Skipping ensemble summary as per config.");
    }

    info!("Ensemble Complete.");
    Ok(())
}
