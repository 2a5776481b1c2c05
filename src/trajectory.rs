use serde::Serialize;
use ssa_common::config::RecordMode;

use crate::engine::Termination;

/// Collects timestamped state observations for one realization.
///
/// In `EveryEvent` mode every state change is recorded as it happens. In
/// `FixedTimepoints` mode the recorder samples the piecewise-constant state
/// onto the configured output grid with carry-forward: timepoints strictly
/// before a transition take the pre-transition state, a timepoint coinciding
/// with a transition takes the post-transition state.
pub struct TrajectoryRecorder {
    mode: RecordMode,
    timepoints: Vec<f64>,
    next_timepoint: usize,
    n_species: usize,
    times: Vec<f64>,
    counts: Vec<u64>,
}

impl TrajectoryRecorder {
    pub fn new(mode: RecordMode, timepoints: &[f64], n_species: usize) -> Self {
        Self {
            mode,
            timepoints: timepoints.to_vec(),
            next_timepoint: 0,
            n_species,
            times: Vec::new(),
            counts: Vec::new(),
        }
    }

    fn push(&mut self, time: f64, state: &[u64]) {
        debug_assert_eq!(state.len(), self.n_species);
        self.times.push(time);
        self.counts.extend_from_slice(state);
    }

    /// Records the state at the start of the realization.
    pub fn observe_initial(&mut self, time: f64, state: &[u64]) {
        if self.mode == RecordMode::EveryEvent {
            self.push(time, state);
        }
    }

    /// Announces that the clock is about to jump to `time` with the state
    /// unchanged since the previous observation. Flushes every pending
    /// timepoint strictly before the jump with that (pre-transition) state.
    pub fn advance_to(&mut self, time: f64, state: &[u64]) {
        if self.mode != RecordMode::FixedTimepoints {
            return;
        }
        while self
            .timepoints
            .get(self.next_timepoint)
            .is_some_and(|&tp| tp < time)
        {
            let tp = self.timepoints[self.next_timepoint];
            self.push(tp, state);
            self.next_timepoint += 1;
        }
    }

    /// Records a state change (reaction firing or event assignment) at `time`.
    pub fn record_change(&mut self, time: f64, state: &[u64]) {
        if self.mode == RecordMode::EveryEvent {
            self.push(time, state);
        }
    }

    /// Completes the recording: the state stays constant through `end_time`,
    /// so the remaining output grid carries the final state.
    pub fn finalize(&mut self, _end_time: f64, state: &[u64]) {
        if self.mode != RecordMode::FixedTimepoints {
            return;
        }
        while self.next_timepoint < self.timepoints.len() {
            let tp = self.timepoints[self.next_timepoint];
            self.push(tp, state);
            self.next_timepoint += 1;
        }
    }

    /// Freezes the recording into an immutable trajectory.
    pub fn finish(self, realization: usize, termination: Termination) -> Trajectory {
        Trajectory {
            realization,
            termination,
            n_species: self.n_species,
            times: self.times,
            counts: self.counts,
        }
    }
}

/// One realization's sample path: an ordered sequence of (time, counts)
/// observations, immutable once the realization completes.
#[derive(Debug, Clone, Serialize)]
pub struct Trajectory {
    pub realization: usize,
    pub termination: Termination,
    n_species: usize,
    times: Vec<f64>,
    /// Row-major species counts, one row of `n_species` per observation.
    counts: Vec<u64>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn n_species(&self) -> usize {
        self.n_species
    }

    pub fn state_at(&self, row: usize) -> &[u64] {
        let start = row * self.n_species;
        &self.counts[start..start + self.n_species]
    }

    /// Iterates over the recorded observations. Calling this again restarts
    /// from the beginning.
    pub fn points(&self) -> impl Iterator<Item = (f64, &[u64])> + '_ {
        self.times
            .iter()
            .enumerate()
            .map(|(row, &time)| (time, self.state_at(row)))
    }

    /// Resamples the piecewise-constant trajectory onto `timepoints` with
    /// carry-forward: each timepoint takes the latest observation at or
    /// before it. Lazy, finite, and restartable — call again for a fresh
    /// pass.
    pub fn sample_at<'a>(&'a self, timepoints: &'a [f64]) -> SampledPoints<'a> {
        SampledPoints {
            trajectory: self,
            timepoints,
            cursor: 0,
            row: 0,
        }
    }
}

/// Carry-forward resampling iterator returned by [`Trajectory::sample_at`].
pub struct SampledPoints<'a> {
    trajectory: &'a Trajectory,
    timepoints: &'a [f64],
    cursor: usize,
    row: usize,
}

impl<'a> Iterator for SampledPoints<'a> {
    type Item = (f64, &'a [u64]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.trajectory.is_empty() {
            return None;
        }
        let &tp = self.timepoints.get(self.cursor)?;
        self.cursor += 1;
        while self.row + 1 < self.trajectory.len() && self.trajectory.times[self.row + 1] <= tp {
            self.row += 1;
        }
        Some((tp, self.trajectory.state_at(self.row)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.timepoints.len() - self.cursor;
        (remaining, Some(remaining))
    }
}
