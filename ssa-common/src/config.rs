use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

// How the trajectory recorder samples state over a realization.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    /// Record every state change (reaction firings and event assignments).
    EveryEvent,
    /// Record at the configured output timepoints with carry-forward sampling.
    FixedTimepoints,
}

// Settings consumed by the simulation core, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunSettings {
    pub num_realizations: usize,
    pub end_time: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_record_mode")]
    pub record_mode: RecordMode,
    #[serde(default)]
    pub output_timepoints: Option<Vec<f64>>,
    /// Fraction of failed realizations above which the whole run is reported
    /// as failed. The default tolerates any number of individual failures.
    #[serde(default = "default_max_failure_fraction")]
    pub max_failure_fraction: f64,
}

fn default_record_mode() -> RecordMode {
    RecordMode::FixedTimepoints
}

fn default_max_failure_fraction() -> f64 {
    1.0
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_trajectories: bool,
    pub save_summary: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

// Main run configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunConfig {
    /// Path to the model definition TOML consumed by the driver.
    pub model_file: String,
    pub run: RunSettings,
    pub output: OutputConfig,
}

impl RunConfig {
    /// Loads the run configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e)
        })?;
        Self::from_toml_str(&config_str)
    }

    /// Parses the run configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(text)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML run configuration: {}", e))?;

        if config.model_file.is_empty() {
            anyhow::bail!("model_file must not be empty.");
        }
        // Semantic validation of the run settings (positive end time, sorted
        // timepoints, ...) happens in the engine before any realization starts.

        Ok(config)
    }
}
