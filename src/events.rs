use log::debug;
use meval::Expr;

use crate::error::SimError;
use crate::network::{eval_expr, EvalScope, ReactionNetwork};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            _ => None,
        }
    }

    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
        }
    }
}

/// Boolean condition tree over expression comparisons.
#[derive(Debug)]
pub enum Condition {
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    pub fn eval(&self, scope: EvalScope<'_>, event: &str) -> Result<bool, SimError> {
        match self {
            Condition::Compare { left, op, right } => {
                let left = eval_condition_operand(left, scope, event)?;
                let right = eval_condition_operand(right, scope, event)?;
                Ok(op.apply(left, right))
            }
            Condition::All(items) => {
                for item in items {
                    if !item.eval(scope, event)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any(items) => {
                for item in items {
                    if item.eval(scope, event)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

fn eval_condition_operand(
    expr: &Expr,
    scope: EvalScope<'_>,
    event: &str,
) -> Result<f64, SimError> {
    eval_expr(expr, scope).map_err(|e| SimError::EventAssignment {
        event: event.to_string(),
        detail: format!("trigger: {}", e),
    })
}

/// When an event fires: at a fixed simulation time, or whenever a condition
/// over the state holds.
#[derive(Debug)]
pub enum Trigger {
    AtTime(f64),
    Condition(Condition),
}

#[derive(Debug, Clone, Copy)]
pub enum AssignTarget {
    Species(usize),
    Parameter(usize),
}

/// One assignment applied when the owning event fires. The value expression
/// is evaluated at fire time, never snapshotted at model definition time.
#[derive(Debug)]
pub struct Assignment {
    pub target: AssignTarget,
    pub value: Expr,
}

#[derive(Debug)]
pub struct Event {
    pub name: String,
    pub trigger: Trigger,
    pub assignments: Vec<Assignment>,
    pub persistent: bool,
    pub one_shot: bool,
}

/// Per-realization event bookkeeping: the prior trigger evaluation per event
/// for edge detection, and fired flags for one-shot and scheduled events.
/// Created fresh for every realization; never shared.
pub struct EventScheduler {
    prev: Vec<bool>,
    fired: Vec<bool>,
}

impl EventScheduler {
    /// Primes the edge-detection state against the initial conditions, so
    /// conditions already true at t=0 do not count as a false-to-true
    /// transition.
    pub fn new(network: &ReactionNetwork, scope: EvalScope<'_>) -> Result<Self, SimError> {
        let mut prev = Vec::with_capacity(network.events().len());
        for event in network.events() {
            let initial = match &event.trigger {
                Trigger::AtTime(at) => scope.time >= *at,
                Trigger::Condition(condition) => condition.eval(scope, &event.name)?,
            };
            prev.push(initial);
        }
        Ok(Self {
            fired: vec![false; network.events().len()],
            prev,
        })
    }

    /// The earliest scheduled event time strictly after `now`, if any remains
    /// unfired. The engine clamps its clock to this boundary.
    pub fn next_scheduled(&self, network: &ReactionNetwork, now: f64) -> Option<f64> {
        network
            .events()
            .iter()
            .enumerate()
            .filter_map(|(idx, event)| match event.trigger {
                Trigger::AtTime(at) if !self.fired[idx] && at > now => Some(at),
                _ => None,
            })
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Runs one event-check pass at the current time, firing every due event
    /// in declaration order. Later events observe earlier events' writes.
    /// Returns whether anything fired.
    pub fn fire_due(
        &mut self,
        network: &ReactionNetwork,
        counts: &mut [u64],
        params: &mut [f64],
        time: f64,
    ) -> Result<bool, SimError> {
        let mut any_fired = false;

        for (idx, event) in network.events().iter().enumerate() {
            let fire = match &event.trigger {
                Trigger::AtTime(at) => !self.fired[idx] && time >= *at,
                Trigger::Condition(condition) => {
                    let scope = EvalScope {
                        network,
                        counts: &*counts,
                        params: &*params,
                        time,
                    };
                    let holds = condition.eval(scope, &event.name)?;
                    let rising = holds && !self.prev[idx];
                    self.prev[idx] = holds;

                    let due = if event.persistent { holds } else { rising };
                    due && !(event.one_shot && self.fired[idx])
                }
            };

            if fire {
                apply_assignments(event, network, counts, params, time)?;
                self.fired[idx] = true;
                any_fired = true;
                debug!("event '{}' fired at t={:.6}", event.name, time);
            }
        }

        Ok(any_fired)
    }
}

/// Evaluates every assignment of `event` against the pre-fire state, then
/// applies the staged results, so assignments within one event cannot observe
/// each other's writes.
fn apply_assignments(
    event: &Event,
    network: &ReactionNetwork,
    counts: &mut [u64],
    params: &mut [f64],
    time: f64,
) -> Result<(), SimError> {
    let mut staged = Vec::with_capacity(event.assignments.len());
    {
        let scope = EvalScope {
            network,
            counts: &*counts,
            params: &*params,
            time,
        };
        for assignment in &event.assignments {
            let value = eval_expr(&assignment.value, scope).map_err(|e| {
                SimError::EventAssignment {
                    event: event.name.clone(),
                    detail: e.to_string(),
                }
            })?;
            if !value.is_finite() {
                return Err(SimError::EventAssignment {
                    event: event.name.clone(),
                    detail: format!("assignment evaluated to {}", value),
                });
            }
            staged.push(value);
        }
    }

    for (assignment, value) in event.assignments.iter().zip(staged) {
        match assignment.target {
            AssignTarget::Parameter(idx) => params[idx] = value,
            AssignTarget::Species(idx) => {
                let rounded = value.round();
                if rounded < 0.0 {
                    return Err(SimError::EventAssignment {
                        event: event.name.clone(),
                        detail: format!(
                            "assignment would set species '{}' to {}",
                            network.species()[idx].name,
                            value
                        ),
                    });
                }
                counts[idx] = rounded as u64;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ReactionNetwork;
    use ssa_common::model::{
        AssignmentSpec, EventSpec, ModelSpec, ParameterSpec, SpeciesSpec, TriggerSpec,
    };

    fn compile(events: Vec<EventSpec>) -> ReactionNetwork {
        let spec = ModelSpec {
            name: None,
            species: vec![SpeciesSpec::new("X", 10)],
            parameters: vec![ParameterSpec::new("k", 1.0), ParameterSpec::new("base", 2.0)],
            reactions: vec![],
            events,
        };
        ReactionNetwork::compile(&spec).unwrap()
    }

    fn scheduler_for(network: &ReactionNetwork, counts: &[u64], params: &[f64]) -> EventScheduler {
        EventScheduler::new(
            network,
            EvalScope {
                network,
                counts,
                params,
                time: 0.0,
            },
        )
        .unwrap()
    }

    #[test]
    fn edge_triggered_event_fires_only_on_transition() {
        let network = compile(vec![EventSpec::new(
            "boost",
            TriggerSpec::compare("X", ">", "15"),
            vec![AssignmentSpec::new("k", "k * 2")],
        )]);
        let mut counts = network.initial_counts();
        let mut params = network.initial_parameters();
        let mut scheduler = scheduler_for(&network, &counts, &params);

        // Condition false: nothing fires.
        assert!(!scheduler
            .fire_due(&network, &mut counts, &mut params, 1.0)
            .unwrap());

        // False -> true: fires once.
        counts[0] = 20;
        assert!(scheduler
            .fire_due(&network, &mut counts, &mut params, 2.0)
            .unwrap());
        assert!((params[0] - 2.0).abs() < 1e-12);

        // Still true: no re-fire while the condition holds.
        assert!(!scheduler
            .fire_due(&network, &mut counts, &mut params, 3.0)
            .unwrap());

        // True -> false -> true: fires again (repeatable by default).
        counts[0] = 5;
        assert!(!scheduler
            .fire_due(&network, &mut counts, &mut params, 4.0)
            .unwrap());
        counts[0] = 20;
        assert!(scheduler
            .fire_due(&network, &mut counts, &mut params, 5.0)
            .unwrap());
        assert!((params[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn condition_true_at_start_does_not_edge_fire() {
        let network = compile(vec![EventSpec::new(
            "already",
            TriggerSpec::compare("X", ">", "5"),
            vec![AssignmentSpec::new("k", "99")],
        )]);
        let mut counts = network.initial_counts(); // X = 10, condition already true
        let mut params = network.initial_parameters();
        let mut scheduler = scheduler_for(&network, &counts, &params);

        assert!(!scheduler
            .fire_due(&network, &mut counts, &mut params, 0.5)
            .unwrap());
        assert!((params[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn persistent_event_fires_while_condition_holds() {
        let mut spec = EventSpec::new(
            "drain",
            TriggerSpec::compare("X", ">", "0"),
            vec![AssignmentSpec::new("X", "X - 1")],
        );
        spec.persistent = true;
        let network = compile(vec![spec]);
        let mut counts = network.initial_counts();
        let mut params = network.initial_parameters();
        let mut scheduler = scheduler_for(&network, &counts, &params);

        for step in 0..3 {
            assert!(scheduler
                .fire_due(&network, &mut counts, &mut params, step as f64)
                .unwrap());
        }
        assert_eq!(counts[0], 7);
    }

    #[test]
    fn one_shot_event_never_refires() {
        let mut spec = EventSpec::new(
            "once",
            TriggerSpec::compare("X", ">", "15"),
            vec![AssignmentSpec::new("k", "k + 1")],
        );
        spec.one_shot = true;
        let network = compile(vec![spec]);
        let mut counts = network.initial_counts();
        let mut params = network.initial_parameters();
        let mut scheduler = scheduler_for(&network, &counts, &params);

        counts[0] = 20;
        assert!(scheduler
            .fire_due(&network, &mut counts, &mut params, 1.0)
            .unwrap());
        counts[0] = 5;
        scheduler
            .fire_due(&network, &mut counts, &mut params, 2.0)
            .unwrap();
        counts[0] = 20;
        assert!(!scheduler
            .fire_due(&network, &mut counts, &mut params, 3.0)
            .unwrap());
        assert!((params[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn assignments_are_evaluated_at_fire_time() {
        // Regression against fixed-at-definition-time semantics: the value
        // applied must reflect `base` as it is when the event fires, not as
        // it was when the model was defined.
        let network = compile(vec![EventSpec::new(
            "scaled",
            TriggerSpec::compare("X", ">", "15"),
            vec![AssignmentSpec::new("k", "2 * base")],
        )]);
        let mut counts = network.initial_counts();
        let mut params = network.initial_parameters();
        let mut scheduler = scheduler_for(&network, &counts, &params);

        params[1] = 10.0; // mutate `base` after model definition
        counts[0] = 20;
        scheduler
            .fire_due(&network, &mut counts, &mut params, 1.0)
            .unwrap();
        assert!((params[0] - 20.0).abs() < 1e-12);
    }

    #[test]
    fn assignments_within_an_event_apply_atomically() {
        // Both assignments read the pre-fire state: a swap works.
        let network = compile(vec![EventSpec::new(
            "swap",
            TriggerSpec::compare("X", ">", "15"),
            vec![
                AssignmentSpec::new("k", "base"),
                AssignmentSpec::new("base", "k"),
            ],
        )]);
        let mut counts = network.initial_counts();
        let mut params = network.initial_parameters();
        let mut scheduler = scheduler_for(&network, &counts, &params);

        counts[0] = 20;
        scheduler
            .fire_due(&network, &mut counts, &mut params, 1.0)
            .unwrap();
        assert!((params[0] - 2.0).abs() < 1e-12);
        assert!((params[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn negative_species_assignment_is_rejected() {
        let network = compile(vec![EventSpec::new(
            "invalid",
            TriggerSpec::compare("X", ">", "15"),
            vec![AssignmentSpec::new("X", "X - 100")],
        )]);
        let mut counts = network.initial_counts();
        let mut params = network.initial_parameters();
        let mut scheduler = scheduler_for(&network, &counts, &params);

        counts[0] = 20;
        let err = scheduler
            .fire_due(&network, &mut counts, &mut params, 1.0)
            .unwrap_err();
        assert!(matches!(err, SimError::EventAssignment { .. }));
    }

    #[test]
    fn scheduled_events_report_the_next_boundary() {
        let network = compile(vec![
            EventSpec::new(
                "late",
                TriggerSpec::at_time(10.0),
                vec![AssignmentSpec::new("k", "1")],
            ),
            EventSpec::new(
                "early",
                TriggerSpec::at_time(2.5),
                vec![AssignmentSpec::new("k", "2")],
            ),
        ]);
        let mut counts = network.initial_counts();
        let mut params = network.initial_parameters();
        let mut scheduler = scheduler_for(&network, &counts, &params);

        assert_eq!(scheduler.next_scheduled(&network, 0.0), Some(2.5));

        scheduler
            .fire_due(&network, &mut counts, &mut params, 2.5)
            .unwrap();
        assert!((params[0] - 2.0).abs() < 1e-12);
        assert_eq!(scheduler.next_scheduled(&network, 2.5), Some(10.0));

        scheduler
            .fire_due(&network, &mut counts, &mut params, 10.0)
            .unwrap();
        assert_eq!(scheduler.next_scheduled(&network, 10.0), None);
    }
}
