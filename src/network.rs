use std::collections::{BTreeMap, HashMap};

use meval::{Context, ContextProvider, Expr};
use ssa_common::model::{ModelSpec, RateSpec, TriggerSpec};

use crate::error::SimError;
use crate::events::{AssignTarget, Assignment, CompareOp, Condition, Event, Trigger};
use crate::propensity::{self, RateConstant, RateLaw};

/// A species with its initial copy number.
#[derive(Debug, Clone)]
pub struct Species {
    pub name: String,
    pub initial: u64,
}

/// A model parameter with its initial value. Per-realization copies may be
/// mutated by events.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
}

/// One reactant or product with its stoichiometric coefficient.
#[derive(Debug, Clone, Copy)]
pub struct Stoich {
    pub species: usize,
    pub count: u32,
}

#[derive(Debug)]
pub struct Reaction {
    pub name: String,
    pub reactants: Vec<Stoich>,
    pub products: Vec<Stoich>,
    pub rate: RateLaw,
    /// Net species change applied when this reaction fires, precomputed at
    /// compile time.
    pub deltas: Vec<(usize, i64)>,
}

/// Immutable reaction network compiled from a `ModelSpec`.
///
/// Shared read-only across all realizations of a run; every piece of mutable
/// state (counts, parameter values, event bookkeeping, RNG) lives in the
/// per-realization engine.
#[derive(Debug)]
pub struct ReactionNetwork {
    species: Vec<Species>,
    parameters: Vec<Parameter>,
    reactions: Vec<Reaction>,
    events: Vec<Event>,
    species_index: HashMap<String, usize>,
    parameter_index: HashMap<String, usize>,
}

impl ReactionNetwork {
    /// Compiles the declarative model into its runtime form, failing fast on
    /// unknown symbols, malformed expressions, or inconsistent stoichiometry.
    pub fn compile(spec: &ModelSpec) -> Result<Self, SimError> {
        let mut species = Vec::with_capacity(spec.species.len());
        let mut species_index = HashMap::new();
        for entry in &spec.species {
            validate_symbol_name(&entry.name)?;
            if species_index
                .insert(entry.name.clone(), species.len())
                .is_some()
            {
                return Err(SimError::ModelDefinition(format!(
                    "duplicate species '{}'",
                    entry.name
                )));
            }
            species.push(Species {
                name: entry.name.clone(),
                initial: entry.initial,
            });
        }

        let mut parameters = Vec::with_capacity(spec.parameters.len());
        let mut parameter_index = HashMap::new();
        for entry in &spec.parameters {
            validate_symbol_name(&entry.name)?;
            if species_index.contains_key(&entry.name) {
                return Err(SimError::ModelDefinition(format!(
                    "parameter '{}' collides with a species name",
                    entry.name
                )));
            }
            if parameter_index
                .insert(entry.name.clone(), parameters.len())
                .is_some()
            {
                return Err(SimError::ModelDefinition(format!(
                    "duplicate parameter '{}'",
                    entry.name
                )));
            }
            parameters.push(Parameter {
                name: entry.name.clone(),
                value: entry.value,
            });
        }

        let mut reactions = Vec::with_capacity(spec.reactions.len());
        for entry in &spec.reactions {
            let reactants = resolve_stoichiometry(&entry.name, &entry.reactants, &species_index)?;
            let products = resolve_stoichiometry(&entry.name, &entry.products, &species_index)?;

            let rate = match (&entry.rate, &entry.propensity) {
                (Some(_), Some(_)) => {
                    return Err(SimError::ModelDefinition(format!(
                        "reaction '{}' declares both a rate and a propensity expression",
                        entry.name
                    )));
                }
                (None, None) => {
                    return Err(SimError::ModelDefinition(format!(
                        "reaction '{}' declares neither a rate nor a propensity expression",
                        entry.name
                    )));
                }
                (Some(RateSpec::Constant(value)), None) => {
                    if !value.is_finite() || *value < 0.0 {
                        return Err(SimError::ModelDefinition(format!(
                            "reaction '{}' has invalid rate constant {}",
                            entry.name, value
                        )));
                    }
                    RateLaw::MassAction(RateConstant::Literal(*value))
                }
                (Some(RateSpec::Parameter(name)), None) => {
                    let idx = parameter_index.get(name).copied().ok_or_else(|| {
                        SimError::ModelDefinition(format!(
                            "reaction '{}' references undefined rate parameter '{}'",
                            entry.name, name
                        ))
                    })?;
                    RateLaw::MassAction(RateConstant::Parameter(idx))
                }
                (None, Some(text)) => RateLaw::Expression(parse_expr(text).map_err(|e| {
                    SimError::ModelDefinition(format!(
                        "reaction '{}' propensity expression: {}",
                        entry.name, e
                    ))
                })?),
            };

            // Net change per species; reactants and products on the same
            // species cancel out.
            let mut net: BTreeMap<usize, i64> = BTreeMap::new();
            for stoich in &reactants {
                *net.entry(stoich.species).or_insert(0) -= i64::from(stoich.count);
            }
            for stoich in &products {
                *net.entry(stoich.species).or_insert(0) += i64::from(stoich.count);
            }
            let deltas = net.into_iter().filter(|&(_, d)| d != 0).collect();

            reactions.push(Reaction {
                name: entry.name.clone(),
                reactants,
                products,
                rate,
                deltas,
            });
        }

        let mut events = Vec::with_capacity(spec.events.len());
        for entry in &spec.events {
            let trigger = compile_trigger(&entry.name, &entry.trigger)?;
            if entry.assignments.is_empty() {
                return Err(SimError::ModelDefinition(format!(
                    "event '{}' has no assignments",
                    entry.name
                )));
            }
            let mut assignments = Vec::with_capacity(entry.assignments.len());
            for assignment in &entry.assignments {
                let target = if let Some(&idx) = species_index.get(&assignment.target) {
                    AssignTarget::Species(idx)
                } else if let Some(&idx) = parameter_index.get(&assignment.target) {
                    AssignTarget::Parameter(idx)
                } else {
                    return Err(SimError::ModelDefinition(format!(
                        "event '{}' assigns to undefined symbol '{}'",
                        entry.name, assignment.target
                    )));
                };
                let value = parse_expr(&assignment.value).map_err(|e| {
                    SimError::ModelDefinition(format!(
                        "event '{}' assignment to '{}': {}",
                        entry.name, assignment.target, e
                    ))
                })?;
                assignments.push(Assignment { target, value });
            }
            events.push(Event {
                name: entry.name.clone(),
                trigger,
                assignments,
                persistent: entry.persistent,
                one_shot: entry.one_shot,
            });
        }

        let network = Self {
            species,
            parameters,
            reactions,
            events,
            species_index,
            parameter_index,
        };
        network.validate_against_initial_state()?;
        Ok(network)
    }

    /// Trial-evaluates every expression against the initial state so that
    /// undefined symbols and obviously invalid propensities abort the run
    /// before any realization starts.
    fn validate_against_initial_state(&self) -> Result<(), SimError> {
        let counts = self.initial_counts();
        let params = self.initial_parameters();
        let scope = EvalScope {
            network: self,
            counts: &counts,
            params: &params,
            time: 0.0,
        };

        for reaction in &self.reactions {
            propensity::propensity(reaction, scope)?;
        }

        for event in &self.events {
            if let Trigger::Condition(condition) = &event.trigger {
                condition.eval(scope, &event.name)?;
            }
            for assignment in &event.assignments {
                eval_expr(&assignment.value, scope).map_err(|e| SimError::EventAssignment {
                    event: event.name.clone(),
                    detail: e.to_string(),
                })?;
            }
        }

        Ok(())
    }

    pub fn species(&self) -> &[Species] {
        &self.species
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn n_species(&self) -> usize {
        self.species.len()
    }

    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.species_index.get(name).copied()
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameter_index.get(name).copied()
    }

    pub fn species_names(&self) -> Vec<&str> {
        self.species.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn initial_counts(&self) -> Vec<u64> {
        self.species.iter().map(|s| s.initial).collect()
    }

    pub fn initial_parameters(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }
}

/// Binds one realization's state for expression evaluation: species resolve
/// to their counts, parameters to their values, and `t` to the clock.
#[derive(Clone, Copy)]
pub struct EvalScope<'a> {
    pub network: &'a ReactionNetwork,
    pub counts: &'a [u64],
    pub params: &'a [f64],
    pub time: f64,
}

impl ContextProvider for EvalScope<'_> {
    fn get_var(&self, name: &str) -> Option<f64> {
        if name == "t" {
            return Some(self.time);
        }
        if let Some(idx) = self.network.species_index(name) {
            return Some(self.counts[idx] as f64);
        }
        self.network.parameter_index(name).map(|idx| self.params[idx])
    }
}

/// Evaluates an expression with the realization state bound, falling back to
/// the builtin math context for functions and constants.
pub fn eval_expr(expr: &Expr, scope: EvalScope<'_>) -> Result<f64, meval::Error> {
    expr.eval_with_context((scope, Context::new()))
}

fn parse_expr(text: &str) -> Result<Expr, meval::Error> {
    text.parse::<Expr>()
}

fn validate_symbol_name(name: &str) -> Result<(), SimError> {
    if name.is_empty() {
        return Err(SimError::ModelDefinition("empty symbol name".into()));
    }
    if name == "t" {
        return Err(SimError::ModelDefinition(
            "symbol name 't' is reserved for the simulation clock".into(),
        ));
    }
    Ok(())
}

fn resolve_stoichiometry(
    reaction: &str,
    entries: &[ssa_common::model::StoichSpec],
    species_index: &HashMap<String, usize>,
) -> Result<Vec<Stoich>, SimError> {
    let mut resolved: Vec<Stoich> = Vec::with_capacity(entries.len());
    for entry in entries {
        let species = species_index.get(&entry.species).copied().ok_or_else(|| {
            SimError::ModelDefinition(format!(
                "reaction '{}' references undefined species '{}'",
                reaction, entry.species
            ))
        })?;
        if entry.count == 0 {
            return Err(SimError::ModelDefinition(format!(
                "reaction '{}' has zero stoichiometry for species '{}'",
                reaction, entry.species
            )));
        }
        if resolved.iter().any(|s| s.species == species) {
            return Err(SimError::ModelDefinition(format!(
                "reaction '{}' lists species '{}' twice; combine the stoichiometry instead",
                reaction, entry.species
            )));
        }
        resolved.push(Stoich {
            species,
            count: entry.count,
        });
    }
    Ok(resolved)
}

fn compile_trigger(event: &str, spec: &TriggerSpec) -> Result<Trigger, SimError> {
    match spec {
        TriggerSpec::AtTime { at } => {
            if !at.is_finite() || *at < 0.0 {
                return Err(SimError::ModelDefinition(format!(
                    "event '{}' has invalid scheduled time {}",
                    event, at
                )));
            }
            Ok(Trigger::AtTime(*at))
        }
        _ => Ok(Trigger::Condition(compile_condition(event, spec)?)),
    }
}

fn compile_condition(event: &str, spec: &TriggerSpec) -> Result<Condition, SimError> {
    match spec {
        TriggerSpec::Compare { left, op, right } => {
            let op = CompareOp::parse(op).ok_or_else(|| {
                SimError::ModelDefinition(format!(
                    "event '{}' uses unknown comparison operator '{}'",
                    event, op
                ))
            })?;
            let left = parse_expr(left).map_err(|e| {
                SimError::ModelDefinition(format!("event '{}' trigger: {}", event, e))
            })?;
            let right = parse_expr(right).map_err(|e| {
                SimError::ModelDefinition(format!("event '{}' trigger: {}", event, e))
            })?;
            Ok(Condition::Compare { left, op, right })
        }
        TriggerSpec::All { all } => Ok(Condition::All(
            all.iter()
                .map(|t| compile_condition(event, t))
                .collect::<Result<_, _>>()?,
        )),
        TriggerSpec::Any { any } => Ok(Condition::Any(
            any.iter()
                .map(|t| compile_condition(event, t))
                .collect::<Result<_, _>>()?,
        )),
        TriggerSpec::AtTime { .. } => Err(SimError::ModelDefinition(format!(
            "event '{}' nests a scheduled time inside a condition",
            event
        ))),
    }
}
