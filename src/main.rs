use anyhow::Result;
use log::{debug, error, info, warn};
use std::fs::File;
use std::io::Write;
use std::time::Instant;

// Define modules used by main
mod engine;
mod error;
mod events;
mod network;
mod propensity;
mod runner;
mod summary;
mod trajectory;

#[cfg(test)]
mod tests;

use network::ReactionNetwork;
use runner::{run_ensemble, CancelToken, RunOutcome};
use ssa_common::config::RunConfig;
use ssa_common::model::ModelSpec;

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting stochastic simulation engine (SSA, direct method)...");

    // --- Load Configuration ---
    let config = RunConfig::load("config.toml")?;
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Compile Model ---
    let build_start = Instant::now();
    let spec = ModelSpec::load(&config.model_file)?;
    let network = ReactionNetwork::compile(&spec)?;
    info!(
        "Compiled model '{}': {} species, {} reactions, {} events.",
        spec.name.as_deref().unwrap_or(&config.model_file),
        network.n_species(),
        network.reactions().len(),
        network.events().len()
    );
    debug!("Model parameters: {:?}", network.parameters());
    info!(
        "Time for model construction: {:.3} ms",
        build_start.elapsed().as_secs_f64() * 1000.0
    );

    // --- Run Realizations ---
    let cancel = CancelToken::new();
    let run_start = Instant::now();
    let outcome = run_ensemble(&network, &config.run, &cancel)?;
    info!(
        "Time for model execution ({} trajectories): {:.3} s",
        config.run.num_realizations,
        run_start.elapsed().as_secs_f64()
    );
    if !outcome.failures.is_empty() {
        warn!(
            "{} of {} realizations failed; their indices are excluded from the output.",
            outcome.failures.len(),
            config.run.num_realizations
        );
    }

    // --- Save Recorded Data ---
    if config.output.save_trajectories {
        let filename = format!("{}_trajectories.csv", config.output.base_filename);
        match write_trajectories_csv(&filename, &network, &outcome) {
            Ok(rows) => info!("{} trajectory rows saved to {}", rows, filename),
            Err(e) => error!("Error saving CSV file '{}': {}", filename, e),
        }
    } else {
        info!("Skipping saving trajectories as per config.");
    }

    if config.output.save_summary {
        match &outcome.summary {
            Some(summary) => {
                let output_format = config.output.format.as_deref().unwrap_or("json");
                match output_format {
                    "json" => {
                        let filename = format!("{}_summary.json", config.output.base_filename);
                        match File::create(&filename) {
                            Ok(mut file) => match serde_json::to_string(summary) {
                                Ok(json_string) => {
                                    if let Err(e) = file.write_all(json_string.as_bytes()) {
                                        error!(
                                            "Error writing summary JSON to file '{}': {}",
                                            filename, e
                                        );
                                    } else {
                                        info!("Summary saved to {}", filename);
                                    }
                                }
                                Err(e) => error!("Error serializing summary to JSON: {}", e),
                            },
                            Err(e) => error!("Error creating summary file '{}': {}", filename, e),
                        }
                    }
                    "bincode" => {
                        // Binary format (much more compact)
                        let filename = format!("{}_summary.bin", config.output.base_filename);
                        match File::create(&filename) {
                            Ok(file) => match bincode::serialize_into(file, summary) {
                                Ok(_) => info!("Summary saved to {} (binary format)", filename),
                                Err(e) => error!("Error serializing summary to bincode: {}", e),
                            },
                            Err(e) => error!("Error creating summary file '{}': {}", filename, e),
                        }
                    }
                    "messagepack" => {
                        // MessagePack format (compact and cross-platform)
                        let filename = format!("{}_summary.msgpack", config.output.base_filename);
                        match &mut File::create(&filename) {
                            Ok(file) => match rmp_serde::encode::write(file, summary) {
                                Ok(_) => {
                                    info!("Summary saved to {} (MessagePack format)", filename)
                                }
                                Err(e) => {
                                    error!("Error serializing summary to MessagePack: {}", e)
                                }
                            },
                            Err(e) => error!("Error creating summary file '{}': {}", filename, e),
                        }
                    }
                    other => {
                        error!("Unknown output format: {}. Skipping summary.", other);
                    }
                }
            }
            None => warn!(
                "save_summary is enabled but no summary was produced; configure output_timepoints."
            ),
        }
    } else {
        info!("Skipping saving summary as per config (save_summary is false).");
    }

    info!("Simulation complete.");
    Ok(())
}

/// Writes every recorded trajectory point as one CSV row:
/// realization, time, then one column per species.
fn write_trajectories_csv(
    filename: &str,
    network: &ReactionNetwork,
    outcome: &RunOutcome,
) -> Result<usize> {
    let mut writer = csv::Writer::from_path(filename)?;

    let mut header = vec!["realization".to_string(), "time".to_string()];
    header.extend(network.species_names().iter().map(|s| s.to_string()));
    writer.write_record(&header)?;

    let mut rows = 0usize;
    for trajectory in &outcome.trajectories {
        for (time, state) in trajectory.points() {
            let mut record = Vec::with_capacity(2 + state.len());
            record.push(trajectory.realization.to_string());
            record.push(format!("{:.6}", time));
            record.extend(state.iter().map(|c| c.to_string()));
            writer.write_record(&record)?;
            rows += 1;
        }
    }
    writer.flush()?;
    Ok(rows)
}
