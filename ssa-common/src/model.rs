use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A chemical/compartmental species with its initial copy number.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SpeciesSpec {
    pub name: String,
    pub initial: u64,
}

impl SpeciesSpec {
    pub fn new(name: impl Into<String>, initial: u64) -> Self {
        Self {
            name: name.into(),
            initial,
        }
    }
}

/// A named floating-point model parameter. Events may reassign its value
/// during a realization.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub value: f64,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Mass-action rate constant: either a literal value or the name of a
/// parameter looked up at evaluation time.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum RateSpec {
    Constant(f64),
    Parameter(String),
}

/// One reactant or product with its stoichiometric coefficient.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StoichSpec {
    pub species: String,
    #[serde(default = "default_stoich_count")]
    pub count: u32,
}

fn default_stoich_count() -> u32 {
    1
}

impl StoichSpec {
    pub fn new(species: impl Into<String>, count: u32) -> Self {
        Self {
            species: species.into(),
            count,
        }
    }
}

/// A reaction: stoichiometry plus either a mass-action `rate` or a custom
/// `propensity` expression over species, parameters and the clock `t`.
/// Exactly one of the two must be given.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReactionSpec {
    pub name: String,
    #[serde(default)]
    pub reactants: Vec<StoichSpec>,
    #[serde(default)]
    pub products: Vec<StoichSpec>,
    #[serde(default)]
    pub rate: Option<RateSpec>,
    #[serde(default)]
    pub propensity: Option<String>,
}

impl ReactionSpec {
    /// Programmatic builder for a mass-action reaction.
    pub fn mass_action(
        name: impl Into<String>,
        reactants: Vec<StoichSpec>,
        products: Vec<StoichSpec>,
        rate: RateSpec,
    ) -> Self {
        Self {
            name: name.into(),
            reactants,
            products,
            rate: Some(rate),
            propensity: None,
        }
    }

    /// Programmatic builder for a reaction with a custom propensity expression.
    pub fn custom(
        name: impl Into<String>,
        reactants: Vec<StoichSpec>,
        products: Vec<StoichSpec>,
        propensity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            reactants,
            products,
            rate: None,
            propensity: Some(propensity.into()),
        }
    }
}

/// Event trigger: a scheduled time, a comparison of two expressions, or an
/// `all`/`any` combination of nested triggers.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum TriggerSpec {
    AtTime { at: f64 },
    Compare { left: String, op: String, right: String },
    All { all: Vec<TriggerSpec> },
    Any { any: Vec<TriggerSpec> },
}

impl TriggerSpec {
    pub fn compare(
        left: impl Into<String>,
        op: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        TriggerSpec::Compare {
            left: left.into(),
            op: op.into(),
            right: right.into(),
        }
    }

    pub fn at_time(at: f64) -> Self {
        TriggerSpec::AtTime { at }
    }
}

/// One event assignment: target species or parameter name, and the value
/// expression evaluated against the state at fire time.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AssignmentSpec {
    pub target: String,
    pub value: String,
}

impl AssignmentSpec {
    pub fn new(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            value: value.into(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EventSpec {
    pub name: String,
    pub trigger: TriggerSpec,
    pub assignments: Vec<AssignmentSpec>,
    /// Level-triggered: fires whenever the condition holds, not only on the
    /// false-to-true transition.
    #[serde(default)]
    pub persistent: bool,
    /// Fires at most once per realization.
    #[serde(default)]
    pub one_shot: bool,
}

impl EventSpec {
    pub fn new(
        name: impl Into<String>,
        trigger: TriggerSpec,
        assignments: Vec<AssignmentSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            assignments,
            persistent: false,
            one_shot: false,
        }
    }
}

/// Declarative description of a reaction network, either deserialized from
/// TOML or assembled programmatically. The engine compiles this into its
/// immutable runtime representation before any realization starts.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModelSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub species: Vec<SpeciesSpec>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub reactions: Vec<ReactionSpec>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
}

impl ModelSpec {
    /// Loads a model definition from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let model_str = std::fs::read_to_string(path_ref).map_err(|e| {
            anyhow::anyhow!("Failed to read model file '{}': {}", path_ref.display(), e)
        })?;
        Self::from_toml_str(&model_str)
    }

    /// Parses a model definition from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let spec: ModelSpec = toml::from_str(text)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML model definition: {}", e))?;

        if spec.species.is_empty() {
            anyhow::bail!("Model must declare at least one species.");
        }

        Ok(spec)
    }
}
