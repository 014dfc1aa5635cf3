use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, VolError};

/// Axis of the search space driven by the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Unique name, also the column header in persisted record tables.
    pub name: String,
    /// Continuous bounds or discrete labels.
    pub kind: VariableKind,
    /// Display unit, free-form (`degC`, `min`, `mL/min`, ...).
    pub unit: String,
}

/// Continuous or categorical flavour of a [`Variable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VariableKind {
    /// Real-valued axis with inclusive lower and upper bounds.
    Continuous {
        /// Lower bound of the axis.
        lower: f64,
        /// Upper bound of the axis, must be strictly above `lower`.
        upper: f64,
    },
    /// Discrete axis described by a set of labels, no numeric bounds.
    Categorical {
        /// Ordered label set; the optimizer works with label indices.
        labels: Vec<String>,
    },
}

impl Variable {
    /// Convenience constructor for a continuous variable.
    pub fn continuous(
        name: impl Into<String>,
        lower: f64,
        upper: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Continuous { lower, upper },
            unit: unit.into(),
        }
    }

    /// Validates the variable definition, rejecting inverted or empty domains.
    pub fn validate(&self) -> Result<(), VolError> {
        match &self.kind {
            VariableKind::Continuous { lower, upper } => {
                if !(lower < upper) {
                    return Err(VolError::Config(
                        ErrorInfo::new("variable-bounds", "lower bound must be below upper bound")
                            .with_context("variable", self.name.clone())
                            .with_context("lower", lower.to_string())
                            .with_context("upper", upper.to_string()),
                    ));
                }
            }
            VariableKind::Categorical { labels } => {
                if labels.is_empty() {
                    return Err(VolError::Config(
                        ErrorInfo::new("variable-labels", "categorical variable has no labels")
                            .with_context("variable", self.name.clone()),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Numeric bounds seen by the optimizer (label index range for categoricals).
    pub fn numeric_bounds(&self) -> (f64, f64) {
        match &self.kind {
            VariableKind::Continuous { lower, upper } => (*lower, *upper),
            VariableKind::Categorical { labels } => (0.0, labels.len() as f64),
        }
    }
}

/// Optimization direction registered per objective, fixed for the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Larger natural values are better.
    Maximize,
    /// Smaller natural values are better.
    Minimize,
}

impl Direction {
    /// Multiplier turning a natural-direction value into a maximize-oriented one.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Maximize => 1.0,
            Direction::Minimize => -1.0,
        }
    }
}

/// Closed catalog of objectives the evaluator knows how to derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectiveKind {
    /// Raw signal area, used directly as a yield proxy.
    Yield,
    /// Signal area corrected for flow dilution.
    NormalizedArea,
    /// Normalized area per unit residence time.
    Throughput,
    /// Organic solvent consumed per experiment, in mL.
    UsedOrganic,
    /// Normalized area penalized by solvent consumption.
    SolventPenalty,
    /// Normalized area per mL of organic solvent.
    ExtractionEfficiency,
}

impl ObjectiveKind {
    /// Stable name used in record tables, metadata and audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectiveKind::Yield => "yield",
            ObjectiveKind::NormalizedArea => "normalized-area",
            ObjectiveKind::Throughput => "throughput",
            ObjectiveKind::UsedOrganic => "used-organic",
            ObjectiveKind::SolventPenalty => "solvent-penalty",
            ObjectiveKind::ExtractionEfficiency => "extraction-efficiency",
        }
    }

    /// Parses a catalog name, rejecting anything outside the closed set.
    pub fn from_name(name: &str) -> Result<Self, VolError> {
        match name {
            "yield" => Ok(ObjectiveKind::Yield),
            "normalized-area" => Ok(ObjectiveKind::NormalizedArea),
            "throughput" => Ok(ObjectiveKind::Throughput),
            "used-organic" => Ok(ObjectiveKind::UsedOrganic),
            "solvent-penalty" => Ok(ObjectiveKind::SolventPenalty),
            "extraction-efficiency" => Ok(ObjectiveKind::ExtractionEfficiency),
            other => Err(VolError::Config(
                ErrorInfo::new("objective-unknown", "objective name not in catalog")
                    .with_context("objective", other.to_string())
                    .with_hint("valid names: yield, normalized-area, throughput, used-organic, solvent-penalty, extraction-efficiency"),
            )),
        }
    }
}

impl fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An objective together with its registered direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSpec {
    /// Which catalog objective to derive.
    pub kind: ObjectiveKind,
    /// Registered optimization direction.
    pub direction: Direction,
}

impl ObjectiveSpec {
    /// Creates a spec for the given kind and direction.
    pub fn new(kind: ObjectiveKind, direction: Direction) -> Self {
        Self { kind, direction }
    }

    /// Applies the registered direction so larger is always better.
    pub fn sign_corrected(&self, natural_value: f64) -> f64 {
        self.direction.sign() * natural_value
    }
}

/// One proposed setting of all search variables, produced by `ask()`.
///
/// Values are ordered per variable registration and consumed exactly once
/// per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePoint(pub Vec<f64>);

impl CandidatePoint {
    /// Returns the ordered values.
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Pairs the values with the given variable definitions by name.
    pub fn named(&self, variables: &[Variable]) -> BTreeMap<String, f64> {
        variables
            .iter()
            .zip(self.0.iter())
            .map(|(variable, value)| (variable.name.clone(), *value))
            .collect()
    }
}

/// Immutable outcome of one completed iteration. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    /// 1-based iteration index, strictly increasing, no gaps.
    pub iteration: usize,
    /// ISO-8601 timestamp taken when the record was created.
    pub timestamp: String,
    /// Candidate values keyed by variable name.
    pub parameters: BTreeMap<String, f64>,
    /// Raw (natural-direction) value per objective name.
    pub raw: BTreeMap<String, f64>,
    /// Sign-corrected (maximize-oriented) value per objective name.
    pub signed: BTreeMap<String, f64>,
    /// Whether the measurement window passed the convergence gate.
    pub converged: bool,
}

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Constructed but not started.
    Idle,
    /// Accepting `step()` calls.
    Running,
    /// Suspended by the operator or by an iteration-fatal error.
    Paused,
    /// Terminated before reaching the iteration target.
    Stopped,
    /// Iteration target reached.
    Completed,
}

/// Current local time formatted the way persisted artifacts expect it.
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
