use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use rand::prelude::*;
use rayon::prelude::*;
use ssa_common::config::{RecordMode, RunSettings};

use crate::engine::{SsaEngine, Termination};
use crate::error::SimError;
use crate::network::ReactionNetwork;
use crate::summary::{summarize, EnsembleSummary};
use crate::trajectory::{Trajectory, TrajectoryRecorder};

/// Run-level cancellation flag, checked by every worker at step boundaries.
/// Cancelling aborts in-flight realizations without corrupting finished ones.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// A realization that ended in a runtime error, tagged with its index.
#[derive(Debug)]
pub struct RealizationFailure {
    pub realization: usize,
    pub error: SimError,
}

/// Everything a run produces: completed trajectories sorted by realization
/// index, per-realization failures, the number of cancelled realizations,
/// and the ensemble summary when an output grid was configured.
pub struct RunOutcome {
    pub trajectories: Vec<Trajectory>,
    pub failures: Vec<RealizationFailure>,
    pub cancelled: usize,
    pub summary: Option<EnsembleSummary>,
}

/// Fail-fast validation of the run settings, before any realization starts.
pub fn validate(settings: &RunSettings) -> Result<(), SimError> {
    if settings.num_realizations == 0 {
        return Err(SimError::Configuration(
            "num_realizations must be greater than zero".into(),
        ));
    }
    if !settings.end_time.is_finite() || settings.end_time <= 0.0 {
        return Err(SimError::Configuration(format!(
            "end_time must be positive and finite, got {}",
            settings.end_time
        )));
    }
    if !settings.max_failure_fraction.is_finite()
        || !(0.0..=1.0).contains(&settings.max_failure_fraction)
    {
        return Err(SimError::Configuration(format!(
            "max_failure_fraction must be within [0, 1], got {}",
            settings.max_failure_fraction
        )));
    }

    let timepoints = settings.output_timepoints.as_deref().unwrap_or(&[]);
    if settings.record_mode == RecordMode::FixedTimepoints && timepoints.is_empty() {
        return Err(SimError::Configuration(
            "record_mode fixed_timepoints requires output_timepoints".into(),
        ));
    }
    for &tp in timepoints {
        if !tp.is_finite() || tp < 0.0 || tp > settings.end_time {
            return Err(SimError::Configuration(format!(
                "output timepoint {} is outside [0, {}]",
                tp, settings.end_time
            )));
        }
    }
    if timepoints.windows(2).any(|w| w[0] > w[1]) {
        return Err(SimError::Configuration(
            "output_timepoints must be sorted in ascending order".into(),
        ));
    }

    Ok(())
}

/// Runs `num_realizations` independent realizations of the network.
///
/// Realizations are embarrassingly parallel: the network is shared read-only,
/// each worker owns its RNG stream, state, and recorder. Per-realization
/// runtime errors are logged and collected; the run only fails when the
/// failed fraction exceeds `max_failure_fraction`.
pub fn run_ensemble(
    network: &ReactionNetwork,
    settings: &RunSettings,
    cancel: &CancelToken,
) -> Result<RunOutcome, SimError> {
    validate(settings)?;

    let base_seed = settings.seed.unwrap_or_else(rand::random::<u64>);
    debug!(
        "running {} realizations to t={} with base seed {}",
        settings.num_realizations, settings.end_time, base_seed
    );
    let timepoints: &[f64] = settings.output_timepoints.as_deref().unwrap_or(&[]);

    let results: Vec<(usize, Result<Trajectory, SimError>)> = (0..settings.num_realizations)
        .into_par_iter()
        .map(|index| {
            let rng = StdRng::seed_from_u64(derive_seed(base_seed, index as u64));
            let result = run_realization(network, settings, timepoints, rng, cancel, index);
            (index, result)
        })
        .collect();

    let mut trajectories = Vec::with_capacity(settings.num_realizations);
    let mut failures = Vec::new();
    let mut cancelled = 0usize;
    for (index, result) in results {
        match result {
            Ok(trajectory) if trajectory.termination == Termination::Cancelled => {
                cancelled += 1;
            }
            Ok(trajectory) => trajectories.push(trajectory),
            Err(err) => {
                error!("realization {} failed: {}", index, err);
                failures.push(RealizationFailure {
                    realization: index,
                    error: err,
                });
            }
        }
    }

    // Workers finish in arbitrary order; downstream consumers get a stable
    // ordering by realization index.
    trajectories.sort_unstable_by_key(|t| t.realization);

    let failed_fraction = failures.len() as f64 / settings.num_realizations as f64;
    if failed_fraction > settings.max_failure_fraction {
        return Err(SimError::FailureThresholdExceeded {
            failed: failures.len(),
            total: settings.num_realizations,
            tolerance: settings.max_failure_fraction,
        });
    }
    if !failures.is_empty() {
        warn!(
            "{} of {} realizations failed (within tolerance {})",
            failures.len(),
            settings.num_realizations,
            settings.max_failure_fraction
        );
    }
    if cancelled > 0 {
        info!("{} realizations cancelled", cancelled);
    }

    let summary = if !timepoints.is_empty() && !trajectories.is_empty() {
        let species = network
            .species_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        Some(summarize(&trajectories, timepoints, species))
    } else {
        None
    };

    Ok(RunOutcome {
        trajectories,
        failures,
        cancelled,
        summary,
    })
}

fn run_realization(
    network: &ReactionNetwork,
    settings: &RunSettings,
    timepoints: &[f64],
    rng: StdRng,
    cancel: &CancelToken,
    index: usize,
) -> Result<Trajectory, SimError> {
    let mut recorder = TrajectoryRecorder::new(settings.record_mode, timepoints, network.n_species());
    let engine = SsaEngine::new(network, rng)?;
    let termination = engine.run(settings.end_time, &mut recorder, cancel)?;
    Ok(recorder.finish(index, termination))
}

/// SplitMix64 mix of the run seed and realization index; adjacent indices map
/// to well-separated generator states.
fn derive_seed(seed: u64, realization: u64) -> u64 {
    const GOLDEN_GAMMA: u64 = 0x9E3779B97F4A7C15;
    let mut z = (seed ^ realization.wrapping_mul(GOLDEN_GAMMA)).wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
