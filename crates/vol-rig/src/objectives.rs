//! Objective derivation from a converged raw measurement.
//!
//! Every catalog objective is a pure function of the raw signal and flow
//! quantities derived from the candidate parameters. Sign correction happens
//! here and nowhere else: all values returned in `signed` are
//! maximize-oriented.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vol_core::errors::ErrorInfo;
use vol_core::{ObjectiveKind, ObjectiveSpec, VolError};

/// Fixed reactor volume of the rig, in mL.
pub const REACTOR_VOLUME_ML: f64 = 1.4;

/// Weight applied to solvent consumption in the penalty objective.
const SOLVENT_PENALTY_WEIGHT: f64 = 10.0;

/// Candidate parameter carrying the requested residence time, in seconds.
pub const PARAM_RESIDENCE_TIME: &str = "residence_time";
/// Candidate parameter carrying the acid fraction of the aqueous stream.
pub const PARAM_ACID: &str = "acid";

/// Flow quantities derived from the candidate parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowDerivation {
    /// Residence time used for the derivation, in seconds.
    pub residence_time: f64,
    /// Total flow through the reactor, in mL/min.
    pub total_flow: f64,
    /// Organic stream flow, in mL/min.
    pub flow_org: f64,
    /// Aqueous stream flow, in mL/min.
    pub flow_aq: f64,
    /// Acid fraction of the aqueous stream.
    pub acid_fraction: f64,
}

impl FlowDerivation {
    /// Derives flows from the candidate parameters.
    ///
    /// Campaigns without a residence-time or acid variable fall back to a
    /// 60 s residence time and an even acid split, matching the rig's
    /// standing configuration.
    pub fn from_parameters(parameters: &BTreeMap<String, f64>) -> Self {
        let residence_time = parameters
            .get(PARAM_RESIDENCE_TIME)
            .copied()
            .filter(|value| *value > 0.0)
            .unwrap_or(60.0);
        let acid_fraction = parameters
            .get(PARAM_ACID)
            .copied()
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let total_flow = REACTOR_VOLUME_ML / (residence_time / 60.0);
        // Even organic/aqueous split; the acid fraction further divides the
        // aqueous side between the two aqueous pumps.
        let flow_org = total_flow / 2.0;
        let flow_aq = total_flow / 2.0;
        Self {
            residence_time,
            total_flow,
            flow_org,
            flow_aq,
            acid_fraction,
        }
    }

    /// Organic solvent consumed over one residence time, in mL.
    pub fn used_organic(&self) -> f64 {
        self.flow_org * self.residence_time / 60.0
    }
}

/// Natural-direction and sign-corrected objective values for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedObjectives {
    /// Natural-direction value per objective name.
    pub raw: BTreeMap<String, f64>,
    /// Maximize-oriented value per objective name, same key set as `raw`.
    pub signed: BTreeMap<String, f64>,
}

impl EvaluatedObjectives {
    /// Sign-corrected values ordered per the given registration order.
    ///
    /// Fails when a registered objective is missing from the evaluation,
    /// which the controller treats as an iteration-fatal cardinality
    /// mismatch.
    pub fn signed_ordered(&self, specs: &[ObjectiveSpec]) -> Result<Vec<f64>, VolError> {
        specs
            .iter()
            .map(|spec| {
                self.signed.get(spec.kind.as_str()).copied().ok_or_else(|| {
                    VolError::Campaign(
                        ErrorInfo::new(
                            "objective-cardinality",
                            "evaluator returned no value for a registered objective",
                        )
                        .with_context("objective", spec.kind.as_str().to_string()),
                    )
                })
            })
            .collect()
    }
}

/// Derives every registered objective from the raw measurement.
pub fn evaluate(
    raw_measurement: f64,
    parameters: &BTreeMap<String, f64>,
    specs: &[ObjectiveSpec],
) -> Result<EvaluatedObjectives, VolError> {
    let flows = FlowDerivation::from_parameters(parameters);
    let mut raw = BTreeMap::new();
    let mut signed = BTreeMap::new();
    for spec in specs {
        let natural = natural_value(spec.kind, raw_measurement, &flows);
        raw.insert(spec.kind.as_str().to_string(), natural);
        signed.insert(spec.kind.as_str().to_string(), spec.sign_corrected(natural));
    }
    Ok(EvaluatedObjectives { raw, signed })
}

fn natural_value(kind: ObjectiveKind, raw_measurement: f64, flows: &FlowDerivation) -> f64 {
    let norm_area = raw_measurement * (1.0 + flows.flow_aq / flows.flow_org);
    match kind {
        ObjectiveKind::Yield => raw_measurement,
        ObjectiveKind::NormalizedArea => norm_area,
        ObjectiveKind::Throughput => norm_area / flows.residence_time,
        ObjectiveKind::UsedOrganic => flows.used_organic(),
        ObjectiveKind::SolventPenalty => norm_area - SOLVENT_PENALTY_WEIGHT * flows.used_organic(),
        ObjectiveKind::ExtractionEfficiency => {
            let organic_volume = flows.used_organic();
            if organic_volume == 0.0 {
                0.0
            } else {
                norm_area / organic_volume
            }
        }
    }
}
