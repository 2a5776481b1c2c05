use thiserror::Error;

/// Errors surfaced by the simulation core.
///
/// `ModelDefinition` and `Configuration` abort a run before any realization
/// starts. The remaining runtime variants are per-realization faults: the
/// runner logs them with the realization index and lets sibling realizations
/// finish.
#[derive(Debug, Error)]
pub enum SimError {
    /// The declarative model failed to compile into a runtime network.
    #[error("model definition error: {0}")]
    ModelDefinition(String),

    /// A propensity evaluated to a negative or non-finite value, or its
    /// expression could not be evaluated.
    #[error("invalid propensity for reaction '{reaction}': {detail}")]
    InvalidPropensity { reaction: String, detail: String },

    /// An event trigger or assignment referenced an undefined symbol or
    /// produced an invalid result.
    #[error("event '{event}': {detail}")]
    EventAssignment { event: String, detail: String },

    /// Runtime arithmetic fault inside a realization.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// Invalid run parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// More realizations failed than the configured tolerance allows.
    #[error("{failed} of {total} realizations failed (tolerated fraction {tolerance})")]
    FailureThresholdExceeded {
        failed: usize,
        total: usize,
        tolerance: f64,
    },
}
