use meval::Expr;

use crate::error::SimError;
use crate::network::{eval_expr, EvalScope, Reaction, ReactionNetwork};

/// Mass-action rate constant, resolved per evaluation so that event
/// assignments to the parameter take effect immediately.
#[derive(Debug, Clone)]
pub enum RateConstant {
    Literal(f64),
    Parameter(usize),
}

/// How a reaction's propensity is computed.
#[derive(Debug)]
pub enum RateLaw {
    /// Rate constant times the combinatorial count of reactant tuples.
    MassAction(RateConstant),
    /// Arbitrary expression over species, parameters and the clock `t`.
    Expression(Expr),
}

/// Computes one reaction's propensity for the current state.
pub fn propensity(reaction: &Reaction, scope: EvalScope<'_>) -> Result<f64, SimError> {
    let value = match &reaction.rate {
        RateLaw::MassAction(rate) => {
            let k = match *rate {
                RateConstant::Literal(value) => value,
                RateConstant::Parameter(idx) => scope.params[idx],
            };
            let mut acc = k;
            for stoich in &reaction.reactants {
                let available = scope.counts[stoich.species];
                if available < u64::from(stoich.count) {
                    return Ok(0.0);
                }
                acc *= combinations(available, stoich.count);
            }
            acc
        }
        RateLaw::Expression(expr) => {
            eval_expr(expr, scope).map_err(|e| SimError::InvalidPropensity {
                reaction: reaction.name.clone(),
                detail: e.to_string(),
            })?
        }
    };

    if !value.is_finite() || value < 0.0 {
        return Err(SimError::InvalidPropensity {
            reaction: reaction.name.clone(),
            detail: format!("evaluated to {}", value),
        });
    }
    Ok(value)
}

/// Evaluates every reaction's propensity into `out` and returns the total.
pub fn evaluate_all(
    network: &ReactionNetwork,
    scope: EvalScope<'_>,
    out: &mut [f64],
) -> Result<f64, SimError> {
    debug_assert_eq!(out.len(), network.reactions().len());
    let mut total = 0.0;
    for (idx, reaction) in network.reactions().iter().enumerate() {
        let value = propensity(reaction, scope)?;
        out[idx] = value;
        total += value;
    }
    if !total.is_finite() {
        return Err(SimError::NumericalInstability(format!(
            "total propensity is {}",
            total
        )));
    }
    Ok(total)
}

/// Selects the firing reaction for a uniform draw in `[0, total)`: the first
/// reaction whose cumulative propensity exceeds the draw. Falls back to the
/// last active reaction when floating-point roundoff pushes the draw past the
/// final cumulative sum.
pub fn select_reaction(propensities: &[f64], draw: f64) -> usize {
    let mut cumulative = 0.0;
    let mut last_active = 0;
    for (idx, &value) in propensities.iter().enumerate() {
        if value <= 0.0 {
            continue;
        }
        cumulative += value;
        last_active = idx;
        if draw < cumulative {
            return idx;
        }
    }
    last_active
}

/// Number of distinct reactant tuples: C(available, count).
///
/// Callers guarantee `available >= count`.
fn combinations(available: u64, count: u32) -> f64 {
    match count {
        0 => 1.0,
        1 => available as f64,
        2 => (available * (available - 1)) as f64 / 2.0,
        _ => {
            let mut acc = 1.0;
            for i in 0..u64::from(count) {
                acc *= (available - i) as f64 / (i + 1) as f64;
            }
            acc
        }
    }
}
