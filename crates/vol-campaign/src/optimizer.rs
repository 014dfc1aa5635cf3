//! Ask/tell optimizer contract and the seeded reference implementation.
//!
//! The surrogate-model mathematics live behind this trait. Observations
//! follow the optimizer convention: fixed-length vectors matching objective
//! registration order, negative-is-better. State export/import is an
//! explicit versioned byte contract so checkpoints stay independent of any
//! in-memory object graph.

use serde::{Deserialize, Serialize};
use vol_core::errors::ErrorInfo;
use vol_core::{derive_substream_seed, CandidatePoint, RngHandle, SchemaVersion, Variable, VolError};

/// Sequential model-based optimizer as seen by the campaign controller.
pub trait AskTellOptimizer {
    /// Proposes the next candidate. Advances internal state only.
    fn ask(&mut self) -> Result<CandidatePoint, VolError>;

    /// Reports an observation for a previously asked candidate.
    ///
    /// `observation` length must equal the registered objective count;
    /// values are negative-is-better.
    fn tell(&mut self, candidate: &CandidatePoint, observation: &[f64]) -> Result<(), VolError>;

    /// Number of observations told so far.
    fn observed(&self) -> usize;

    /// Serializes the full internal state.
    fn export_state(&self) -> Result<Vec<u8>, VolError>;

    /// Replaces the internal state with a previously exported one.
    fn import_state(&mut self, bytes: &[u8]) -> Result<(), VolError>;
}

/// Serialized state of [`RandomSearchOptimizer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchState {
    schema_version: SchemaVersion,
    master_seed: u64,
    bounds: Vec<(f64, f64)>,
    n_objectives: usize,
    initial_points: usize,
    draws: u64,
    observations: Vec<(Vec<f64>, Vec<f64>)>,
}

/// Deterministic seeded search over the variable box.
///
/// The first `initial_points` candidates are uniform over the bounds; later
/// candidates are drawn from a shrunken box around the best observation so
/// far. Every `ask()` derives its RNG from `(master_seed, draw_index)`,
/// which makes resumed campaigns propose exactly the candidates an
/// uninterrupted run would have proposed.
#[derive(Debug, Clone)]
pub struct RandomSearchOptimizer {
    state: SearchState,
}

/// Fraction of each axis kept around the incumbent during exploitation.
const EXPLOIT_BOX_FRACTION: f64 = 0.2;

impl RandomSearchOptimizer {
    /// Creates a fresh optimizer bound to the given variable domains.
    pub fn new(
        variables: &[Variable],
        n_objectives: usize,
        initial_points: usize,
        master_seed: u64,
    ) -> Self {
        Self {
            state: SearchState {
                schema_version: SchemaVersion::default(),
                master_seed,
                bounds: variables.iter().map(Variable::numeric_bounds).collect(),
                n_objectives,
                initial_points: initial_points.max(1),
                draws: 0,
                observations: Vec::new(),
            },
        }
    }

    /// Reconstructs an optimizer from an exported state blob.
    pub fn from_state(bytes: &[u8]) -> Result<Self, VolError> {
        let state = decode_state(bytes)?;
        Ok(Self { state })
    }

    fn best_observation(&self) -> Option<&(Vec<f64>, Vec<f64>)> {
        // Negative-is-better convention; compare on the first objective and
        // keep the earliest on exact ties.
        self.state.observations.iter().fold(None, |best, entry| {
            match best {
                Some(current) if entry.1[0] < current.1[0] => Some(entry),
                Some(current) => Some(current),
                None => Some(entry),
            }
        })
    }
}

impl AskTellOptimizer for RandomSearchOptimizer {
    fn ask(&mut self) -> Result<CandidatePoint, VolError> {
        let mut rng = RngHandle::from_seed(derive_substream_seed(
            self.state.master_seed,
            self.state.draws,
        ));
        let exploit = self
            .best_observation()
            .filter(|_| self.state.observations.len() >= self.state.initial_points)
            .map(|(candidate, _)| candidate.clone());
        let mut values = Vec::with_capacity(self.state.bounds.len());
        for (axis, (lower, upper)) in self.state.bounds.iter().enumerate() {
            let value = match &exploit {
                Some(incumbent) => {
                    let half_width = (upper - lower) * EXPLOIT_BOX_FRACTION / 2.0;
                    let low = (incumbent[axis] - half_width).max(*lower);
                    let high = (incumbent[axis] + half_width).min(*upper);
                    if low < high {
                        rng.uniform_in(low, high)
                    } else {
                        incumbent[axis]
                    }
                }
                None => rng.uniform_in(*lower, *upper),
            };
            values.push(value);
        }
        self.state.draws += 1;
        Ok(CandidatePoint(values))
    }

    fn tell(&mut self, candidate: &CandidatePoint, observation: &[f64]) -> Result<(), VolError> {
        if observation.len() != self.state.n_objectives {
            return Err(VolError::Optimizer(
                ErrorInfo::new("observation-cardinality", "observation length mismatch")
                    .with_context("expected", self.state.n_objectives.to_string())
                    .with_context("received", observation.len().to_string()),
            ));
        }
        self.state
            .observations
            .push((candidate.values().to_vec(), observation.to_vec()));
        Ok(())
    }

    fn observed(&self) -> usize {
        self.state.observations.len()
    }

    fn export_state(&self) -> Result<Vec<u8>, VolError> {
        bincode::serialize(&self.state).map_err(|err| {
            VolError::Optimizer(ErrorInfo::new("state-export", err.to_string()))
        })
    }

    fn import_state(&mut self, bytes: &[u8]) -> Result<(), VolError> {
        self.state = decode_state(bytes)?;
        Ok(())
    }
}

fn decode_state(bytes: &[u8]) -> Result<SearchState, VolError> {
    let state: SearchState = bincode::deserialize(bytes).map_err(|err| {
        VolError::Optimizer(ErrorInfo::new("state-import", err.to_string()))
    })?;
    let supported = SchemaVersion::default();
    if !supported.accepts(&state.schema_version) {
        return Err(VolError::Optimizer(
            ErrorInfo::new("state-schema", "unsupported optimizer state schema")
                .with_context("found", format!("{:?}", state.schema_version))
                .with_context("supported", format!("{supported:?}")),
        ));
    }
    Ok(state)
}
