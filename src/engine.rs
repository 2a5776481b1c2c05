use log::trace;
use rand::prelude::*;
use rand_distr::Exp;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::events::EventScheduler;
use crate::network::{EvalScope, ReactionNetwork};
use crate::propensity::{evaluate_all, select_reaction};
use crate::runner::CancelToken;
use crate::trajectory::TrajectoryRecorder;

/// Why a realization stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The clock reached the configured end time.
    EndTimeReached,
    /// No reaction can fire and no scheduled event remains.
    Absorbed,
    /// The run-level cancellation token was set.
    Cancelled,
}

/// Gillespie Direct Method driver for a single realization.
///
/// Owns every piece of mutable state for the realization: species counts,
/// parameter values, event bookkeeping, and the RNG stream. The reaction
/// network itself is shared read-only.
pub struct SsaEngine<'a> {
    network: &'a ReactionNetwork,
    rng: StdRng,
    counts: Vec<u64>,
    params: Vec<f64>,
    propensities: Vec<f64>,
    scheduler: EventScheduler,
    time: f64,
}

impl<'a> SsaEngine<'a> {
    pub fn new(network: &'a ReactionNetwork, rng: StdRng) -> Result<Self, SimError> {
        let counts = network.initial_counts();
        let params = network.initial_parameters();
        let scheduler = EventScheduler::new(
            network,
            EvalScope {
                network,
                counts: &counts,
                params: &params,
                time: 0.0,
            },
        )?;
        Ok(Self {
            network,
            rng,
            propensities: vec![0.0; network.reactions().len()],
            counts,
            params,
            scheduler,
            time: 0.0,
        })
    }

    /// Runs the realization until `end_time`, an absorbing state, or
    /// cancellation, feeding every observation to the recorder.
    pub fn run(
        mut self,
        end_time: f64,
        recorder: &mut TrajectoryRecorder,
        cancel: &CancelToken,
    ) -> Result<Termination, SimError> {
        recorder.observe_initial(self.time, &self.counts);
        // Scheduled events at t=0 and persistent conditions already true fire
        // before the first reaction is selected.
        self.fire_events(recorder)?;

        let termination = loop {
            if cancel.is_cancelled() {
                break Termination::Cancelled;
            }

            let scope = EvalScope {
                network: self.network,
                counts: &self.counts,
                params: &self.params,
                time: self.time,
            };
            let total = evaluate_all(self.network, scope, &mut self.propensities)?;

            let next_event = self.scheduler.next_scheduled(self.network, self.time);

            if total <= 0.0 {
                // Absorbing state: only a scheduled event can restart the
                // dynamics.
                match next_event {
                    Some(at) if at < end_time => {
                        self.advance_to(at, recorder)?;
                        continue;
                    }
                    _ => break Termination::Absorbed,
                }
            }

            let exp = Exp::new(total).map_err(|e| {
                SimError::NumericalInstability(format!(
                    "exponential draw with rate {}: {}",
                    total, e
                ))
            })?;
            let tau: f64 = self.rng.sample(exp);
            let proposed = self.time + tau;

            let boundary = next_event.map_or(end_time, |at| at.min(end_time));
            if proposed >= boundary {
                // Clamp to the boundary and process events there; the
                // exponential draw is discarded (memoryless).
                if boundary >= end_time {
                    self.time = end_time;
                    break Termination::EndTimeReached;
                }
                self.advance_to(boundary, recorder)?;
                continue;
            }

            let draw = self.rng.random::<f64>() * total;
            let chosen = select_reaction(&self.propensities, draw);
            trace!(
                "t={:.6} tau={:.6} firing reaction '{}'",
                self.time,
                tau,
                self.network.reactions()[chosen].name
            );

            recorder.advance_to(proposed, &self.counts);
            self.apply_reaction(chosen)?;
            self.time = proposed;
            recorder.record_change(self.time, &self.counts);

            // Post-step event check: edge detection against the evaluations
            // from before this step.
            self.fire_events(recorder)?;
        };

        if termination != Termination::Cancelled {
            // State is piecewise-constant after the last transition, so the
            // tail of the output grid carries the final state.
            recorder.finalize(end_time, &self.counts);
        }
        Ok(termination)
    }

    /// Clamps the clock to a boundary, firing due events there.
    fn advance_to(
        &mut self,
        boundary: f64,
        recorder: &mut TrajectoryRecorder,
    ) -> Result<(), SimError> {
        recorder.advance_to(boundary, &self.counts);
        self.time = boundary;
        self.fire_events(recorder)?;
        Ok(())
    }

    fn fire_events(&mut self, recorder: &mut TrajectoryRecorder) -> Result<bool, SimError> {
        let fired = self.scheduler.fire_due(
            self.network,
            &mut self.counts,
            &mut self.params,
            self.time,
        )?;
        if fired {
            recorder.record_change(self.time, &self.counts);
        }
        Ok(fired)
    }

    /// Applies a reaction's stoichiometric deltas atomically. Decrements are
    /// checked; a custom propensity that stays positive without sufficient
    /// reactants is caught here.
    fn apply_reaction(&mut self, idx: usize) -> Result<(), SimError> {
        let network = self.network;
        let reaction = &network.reactions()[idx];
        for &(species, delta) in &reaction.deltas {
            if delta < 0 {
                let decrement = delta.unsigned_abs();
                self.counts[species] =
                    self.counts[species].checked_sub(decrement).ok_or_else(|| {
                        SimError::NumericalInstability(format!(
                            "reaction '{}' would drive species '{}' negative",
                            reaction.name, network.species()[species].name
                        ))
                    })?;
            } else {
                self.counts[species] += delta as u64;
            }
        }
        Ok(())
    }
}
