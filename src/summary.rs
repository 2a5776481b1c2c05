use serde::Serialize;

use crate::trajectory::Trajectory;

/// Ensemble statistics per species per output timepoint, computed across the
/// completed realizations of a run.
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleSummary {
    pub timepoints: Vec<f64>,
    pub species: Vec<String>,
    /// Number of realizations aggregated.
    pub realizations: usize,
    /// Row-major [timepoint][species] means.
    pub mean: Vec<f64>,
    /// Row-major [timepoint][species] unbiased sample variances; zero when
    /// fewer than two realizations contributed.
    pub variance: Vec<f64>,
}

impl EnsembleSummary {
    pub fn cell(&self, timepoint: usize, species: usize) -> (f64, f64) {
        let idx = timepoint * self.species.len() + species;
        (self.mean[idx], self.variance[idx])
    }
}

/// Aggregates mean and variance with Welford's online update, sampling each
/// trajectory onto the output grid with carry-forward.
///
/// Completion order does not matter; the accumulation is symmetric in the
/// realizations.
pub fn summarize(
    trajectories: &[Trajectory],
    timepoints: &[f64],
    species: Vec<String>,
) -> EnsembleSummary {
    let n_species = species.len();
    let cells = timepoints.len() * n_species;
    let mut mean = vec![0.0; cells];
    let mut m2 = vec![0.0; cells];
    let mut n = 0usize;

    for trajectory in trajectories {
        debug_assert_eq!(trajectory.n_species(), n_species);
        n += 1;
        for (row, (_, state)) in trajectory.sample_at(timepoints).enumerate() {
            for (col, &count) in state.iter().enumerate() {
                let idx = row * n_species + col;
                let x = count as f64;
                let delta = x - mean[idx];
                mean[idx] += delta / n as f64;
                m2[idx] += delta * (x - mean[idx]);
            }
        }
    }

    let variance = if n > 1 {
        m2.iter().map(|&v| v / (n - 1) as f64).collect()
    } else {
        vec![0.0; cells]
    };

    EnsembleSummary {
        timepoints: timepoints.to_vec(),
        species,
        realizations: n,
        mean,
        variance,
    }
}
