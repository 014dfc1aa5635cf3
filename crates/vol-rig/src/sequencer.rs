//! Per-iteration experiment sequencing.
//!
//! One `run` call walks the phase machine
//! `Idle -> Preconditioning -> Settling -> Acquiring -> TearingDown -> Idle`.
//! Teardown executes on every exit path; a fatal acquisition error jumps
//! straight to `TearingDown` and the original error is surfaced to the
//! caller with all actuators stopped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vol_core::{ObjectiveSpec, VolError};

use crate::audit::AuditLog;
use crate::backend::ProcessBackend;
use crate::bridge::Clock;
use crate::objectives::{self, EvaluatedObjectives};
use crate::sampler::{self, SampleOutcome, SamplerSettings};

/// Phase of the per-iteration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequencerPhase {
    /// Between iterations.
    Idle,
    /// Driving the process to the candidate's conditions.
    Preconditioning,
    /// Waiting for steady state.
    Settling,
    /// Collecting the measurement window.
    Acquiring,
    /// Stopping actuators.
    TearingDown,
}

/// Output of one sequenced iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedMeasurement {
    /// Converged (or cap-accepted) measurement window.
    pub sample: SampleOutcome,
    /// Derived objective values, natural and sign-corrected.
    pub objectives: EvaluatedObjectives,
}

/// Drives precondition, settle, acquisition and teardown around the sampler.
///
/// Stateless with respect to campaign data: candidate parameters come in,
/// evaluated objectives go out.
pub struct ExperimentSequencer {
    backend: Box<dyn ProcessBackend>,
    sampler: SamplerSettings,
    phase: SequencerPhase,
}

impl ExperimentSequencer {
    /// Creates a sequencer around the resolved process backend.
    pub fn new(backend: Box<dyn ProcessBackend>, sampler: SamplerSettings) -> Self {
        Self {
            backend,
            sampler,
            phase: SequencerPhase::Idle,
        }
    }

    /// Current phase, observable mid-iteration for diagnostics.
    pub fn phase(&self) -> SequencerPhase {
        self.phase
    }

    /// Runs one full iteration for the given candidate parameters.
    pub fn run(
        &mut self,
        iteration: usize,
        parameters: &BTreeMap<String, f64>,
        specs: &[ObjectiveSpec],
        clock: &mut dyn Clock,
        mut audit: Option<&mut AuditLog>,
    ) -> Result<SequencedMeasurement, VolError> {
        self.phase = SequencerPhase::Preconditioning;
        if let Err(err) = self.backend.precondition(parameters, clock) {
            return Err(self.fail(err));
        }

        self.phase = SequencerPhase::Settling;
        if let Err(err) = self.backend.settle(parameters, clock) {
            return Err(self.fail(err));
        }

        self.phase = SequencerPhase::Acquiring;
        let backend = &mut self.backend;
        let acquired = sampler::sample(
            || backend.read_signal(parameters),
            &self.sampler,
            clock,
            |index, value| match audit.as_deref_mut() {
                Some(log) => log.append(iteration, parameters, index, value),
                None => Ok(()),
            },
        );
        let sample = match acquired {
            Ok(sample) => sample,
            Err(err) => return Err(self.fail(err)),
        };

        self.phase = SequencerPhase::TearingDown;
        let teardown = self.backend.teardown();
        self.phase = SequencerPhase::Idle;
        teardown?;

        let objectives = objectives::evaluate(sample.mean, parameters, specs)?;
        Ok(SequencedMeasurement { sample, objectives })
    }

    /// Tears down after a failure; the original error wins over teardown errors.
    fn fail(&mut self, err: VolError) -> VolError {
        self.phase = SequencerPhase::TearingDown;
        let _ = self.backend.teardown();
        self.phase = SequencerPhase::Idle;
        err
    }
}
