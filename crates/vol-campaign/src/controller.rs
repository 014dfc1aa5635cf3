//! Campaign lifecycle and the ask -> sequence -> tell loop.
//!
//! The controller is the only mutator of campaign state. One external
//! `step()` call performs exactly one iteration; stop and pause requests are
//! honored only at iteration boundaries, so an in-flight measurement always
//! finishes or fails before a flag takes effect.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vol_core::errors::ErrorInfo;
use vol_core::{
    now_timestamp, CampaignStatus, ExperimentRecord, ObjectiveSpec, VolError,
};
use vol_rig::{
    backend_for_mode, AuditLog, Clock, DeviceBridge, ExperimentSequencer, SystemClock,
};

use crate::checkpoint::{self, metadata_now, CheckpointPayload, AUDIT_FILE};
use crate::config::CampaignConfig;
use crate::optimizer::{AskTellOptimizer, RandomSearchOptimizer};
use crate::pareto;

/// Result of one `step()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One iteration completed; more remain.
    Advanced,
    /// A pending stop request was honored before the iteration began.
    Stopped,
    /// The iteration target was reached; the final summary was persisted.
    Completed,
}

/// Final result persisted when a campaign completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignOutcome {
    /// Best record for single-objective campaigns (earliest iteration wins
    /// exact ties on the sign-corrected value).
    pub best: Option<ExperimentRecord>,
    /// Non-dominated front for multi-objective campaigns.
    pub front: Vec<ExperimentRecord>,
}

/// Owns the campaign loop and all mutable campaign state.
pub struct CampaignController {
    config: CampaignConfig,
    specs: Vec<ObjectiveSpec>,
    config_hash: String,
    optimizer: Box<dyn AskTellOptimizer>,
    sequencer: ExperimentSequencer,
    clock: Box<dyn Clock>,
    audit: AuditLog,
    records: Vec<ExperimentRecord>,
    iteration: usize,
    status: CampaignStatus,
    stop_requested: bool,
    run_dir: PathBuf,
}

impl std::fmt::Debug for CampaignController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignController")
            .field("config", &self.config)
            .field("specs", &self.specs)
            .field("config_hash", &self.config_hash)
            .field("records", &self.records)
            .field("iteration", &self.iteration)
            .field("status", &self.status)
            .field("stop_requested", &self.stop_requested)
            .field("run_dir", &self.run_dir)
            .finish_non_exhaustive()
    }
}

impl CampaignController {
    /// Validates the configuration, builds the campaign and transitions it
    /// to running. The reference optimizer is used.
    ///
    /// `bridge` is required in real mode and ignored otherwise. All
    /// configuration errors surface here; a rejected campaign never runs.
    pub fn start(
        config: CampaignConfig,
        bridge: Option<Box<dyn DeviceBridge>>,
    ) -> Result<Self, VolError> {
        let specs = config.resolve_objectives()?;
        let optimizer = Box::new(RandomSearchOptimizer::new(
            &config.variables,
            specs.len(),
            config.initial_points,
            config.seed_policy.master_seed,
        ));
        Self::start_with_optimizer(config, optimizer, bridge, Box::new(SystemClock))
    }

    /// As [`CampaignController::start`], with an explicit optimizer and clock.
    pub fn start_with_optimizer(
        config: CampaignConfig,
        optimizer: Box<dyn AskTellOptimizer>,
        bridge: Option<Box<dyn DeviceBridge>>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, VolError> {
        let specs = config.resolve_objectives()?;
        let config_hash = config.hash()?;
        let run_dir = config.run_directory();
        std::fs::create_dir_all(&run_dir).map_err(|err| {
            VolError::Serde(
                ErrorInfo::new("run-dir", err.to_string())
                    .with_context("path", run_dir.display().to_string()),
            )
        })?;
        let audit = AuditLog::create(&run_dir.join(AUDIT_FILE), &config.variables)?;
        let backend = backend_for_mode(
            config.mode,
            bridge,
            config.rig.clone(),
            config.seed_policy.master_seed,
        )?;
        let sequencer = ExperimentSequencer::new(backend, config.sampler.clone());
        let controller = Self {
            config,
            specs,
            config_hash,
            optimizer,
            sequencer,
            clock,
            audit,
            records: Vec::new(),
            iteration: 0,
            status: CampaignStatus::Running,
            stop_requested: false,
            run_dir,
        };
        // Baseline checkpoint so the run is resumable before the first step.
        controller.save_checkpoint()?;
        Ok(controller)
    }

    /// Rebuilds a running campaign from its last checkpoint, using the
    /// reference optimizer.
    pub fn resume(
        root: &Path,
        run_name: &str,
        bridge: Option<Box<dyn DeviceBridge>>,
    ) -> Result<Self, VolError> {
        let payload = CheckpointPayload::load(&checkpoint::run_directory(root, run_name))?;
        let optimizer = Box::new(RandomSearchOptimizer::from_state(&payload.optimizer_blob)?);
        Self::resume_from_payload(root, payload, optimizer, bridge, Box::new(SystemClock))
    }

    /// As [`CampaignController::resume`], with an explicit optimizer (whose
    /// state is replaced by the checkpointed blob) and clock.
    pub fn resume_with_optimizer(
        root: &Path,
        run_name: &str,
        mut optimizer: Box<dyn AskTellOptimizer>,
        bridge: Option<Box<dyn DeviceBridge>>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, VolError> {
        let payload = CheckpointPayload::load(&checkpoint::run_directory(root, run_name))?;
        optimizer.import_state(&payload.optimizer_blob)?;
        Self::resume_from_payload(root, payload, optimizer, bridge, clock)
    }

    fn resume_from_payload(
        root: &Path,
        payload: CheckpointPayload,
        optimizer: Box<dyn AskTellOptimizer>,
        bridge: Option<Box<dyn DeviceBridge>>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, VolError> {
        let mut config = payload.metadata.config.clone();
        // The caller's root wins over the stored one, so a run resumed from
        // a relocated directory keeps writing where it was found.
        config.checkpoint_root = root.to_path_buf();
        let specs = config.resolve_objectives()?;
        if optimizer.observed() != payload.records.len() {
            return Err(VolError::Serde(
                ErrorInfo::new(
                    "checkpoint-observation-drift",
                    "optimizer state does not match the record table",
                )
                .with_context("observed", optimizer.observed().to_string())
                .with_context("records", payload.records.len().to_string()),
            ));
        }
        let run_dir = config.run_directory();
        let audit = AuditLog::create(&run_dir.join(AUDIT_FILE), &config.variables)?;
        let backend = backend_for_mode(
            config.mode,
            bridge,
            config.rig.clone(),
            config.seed_policy.master_seed,
        )?;
        let sequencer = ExperimentSequencer::new(backend, config.sampler.clone());
        let status = match payload.metadata.status {
            CampaignStatus::Completed => CampaignStatus::Completed,
            _ => CampaignStatus::Running,
        };
        Ok(Self {
            config,
            specs,
            config_hash: payload.metadata.config_hash,
            optimizer,
            sequencer,
            clock,
            audit,
            iteration: payload.metadata.iteration,
            records: payload.records,
            status,
            stop_requested: false,
            run_dir,
        })
    }

    /// Executes one iteration: ask, sequence, evaluate, tell, record,
    /// checkpoint.
    ///
    /// Iteration-fatal errors leave the campaign exactly at its last
    /// checkpoint: the sequencer has already torn the rig down, no record is
    /// appended and the failed candidate was never told to the optimizer.
    /// Bridge failures stop the campaign; measurement and cardinality
    /// failures pause it for operator intervention.
    pub fn step(&mut self) -> Result<StepOutcome, VolError> {
        if self.status != CampaignStatus::Running {
            return Err(VolError::Campaign(
                ErrorInfo::new("not-running", "step() requires a running campaign")
                    .with_context("status", format!("{:?}", self.status)),
            ));
        }
        if self.stop_requested {
            self.stop_requested = false;
            self.status = CampaignStatus::Stopped;
            self.save_checkpoint()?;
            return Ok(StepOutcome::Stopped);
        }

        let candidate = self.optimizer.ask()?;
        let parameters = candidate.named(&self.config.variables);
        let measurement = match self.sequencer.run(
            self.iteration + 1,
            &parameters,
            &self.specs,
            self.clock.as_mut(),
            Some(&mut self.audit),
        ) {
            Ok(measurement) => measurement,
            Err(err) => {
                self.status = match &err {
                    VolError::Bridge(_) => CampaignStatus::Stopped,
                    _ => CampaignStatus::Paused,
                };
                return Err(err);
            }
        };

        let signed = match measurement.objectives.signed_ordered(&self.specs) {
            Ok(signed) => signed,
            Err(err) => {
                self.status = CampaignStatus::Paused;
                return Err(err);
            }
        };
        // Optimizer convention is negative-is-better; negate exactly once.
        let observation: Vec<f64> = signed.iter().map(|value| -value).collect();
        if let Err(err) = self.optimizer.tell(&candidate, &observation) {
            self.status = CampaignStatus::Paused;
            return Err(err);
        }

        self.records.push(ExperimentRecord {
            iteration: self.iteration + 1,
            timestamp: now_timestamp(),
            parameters,
            raw: measurement.objectives.raw,
            signed: measurement.objectives.signed,
            converged: measurement.sample.converged,
        });
        self.iteration += 1;

        if self.iteration == self.config.total_iterations {
            self.status = CampaignStatus::Completed;
            self.save_checkpoint()?;
            self.persist_outcome()?;
            return Ok(StepOutcome::Completed);
        }
        self.save_checkpoint()?;
        Ok(StepOutcome::Advanced)
    }

    /// Suspends a running campaign. Nothing is written beyond the last
    /// checkpoint; no pause record is created.
    pub fn pause(&mut self) -> Result<(), VolError> {
        match self.status {
            CampaignStatus::Running => {
                self.status = CampaignStatus::Paused;
                Ok(())
            }
            _ => Err(transition_error("pause", self.status)),
        }
    }

    /// Resumes a paused campaign.
    pub fn unpause(&mut self) -> Result<(), VolError> {
        match self.status {
            CampaignStatus::Paused => {
                self.status = CampaignStatus::Running;
                Ok(())
            }
            _ => Err(transition_error("resume", self.status)),
        }
    }

    /// Requests a cooperative stop, honored at the next `step()` boundary.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Current lifecycle status.
    pub fn status(&self) -> CampaignStatus {
        self.status
    }

    /// Completed iteration count.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Accumulated experiment records, in iteration order.
    pub fn records(&self) -> &[ExperimentRecord] {
        &self.records
    }

    /// Per-run artifact directory.
    pub fn run_directory(&self) -> &Path {
        &self.run_dir
    }

    /// Computes the campaign outcome from the accumulated records.
    ///
    /// Single-objective campaigns report the best record; multi-objective
    /// campaigns report the non-dominated front (the two-objective sweep, or
    /// pairwise dominance filtering beyond two objectives).
    pub fn outcome(&self) -> Result<CampaignOutcome, VolError> {
        if self.specs.len() == 1 {
            Ok(CampaignOutcome {
                best: self.best_record()?.cloned(),
                front: Vec::new(),
            })
        } else if self.specs.len() == 2 {
            Ok(CampaignOutcome {
                best: None,
                front: pareto::front(&self.records, self.specs[0], self.specs[1])?,
            })
        } else {
            Ok(CampaignOutcome {
                best: None,
                front: self.pairwise_front()?,
            })
        }
    }

    /// Best record under the sign-corrected first objective; earliest
    /// iteration wins exact ties.
    pub fn best_record(&self) -> Result<Option<&ExperimentRecord>, VolError> {
        match self.specs.first() {
            Some(spec) => best_record(&self.records, *spec),
            None => Ok(None),
        }
    }

    fn pairwise_front(&self) -> Result<Vec<ExperimentRecord>, VolError> {
        let mut values = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let signed = record_signed(record, &self.specs)?;
            values.push((signed, record));
        }
        let mut members: Vec<ExperimentRecord> = Vec::new();
        for (candidate_values, candidate) in &values {
            let dominated = values
                .iter()
                .any(|(other_values, _)| pareto::dominates(other_values, candidate_values));
            if !dominated {
                members.push((*candidate).clone());
            }
        }
        Ok(members)
    }

    fn persist_outcome(&self) -> Result<(), VolError> {
        let outcome = self.outcome()?;
        let path = self.run_dir.join("summary.json");
        let json = serde_json::to_string_pretty(&outcome).map_err(|err| {
            VolError::Serde(ErrorInfo::new("summary-serialize", err.to_string()))
        })?;
        std::fs::write(&path, json).map_err(|err| {
            VolError::Serde(
                ErrorInfo::new("summary-write", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })
    }

    fn save_checkpoint(&self) -> Result<(), VolError> {
        let payload = CheckpointPayload {
            metadata: metadata_now(
                &self.config,
                &self.config_hash,
                self.iteration,
                self.status,
                self.optimizer.observed(),
            ),
            records: self.records.clone(),
            optimizer_blob: self.optimizer.export_state()?,
        };
        payload.store(&self.run_dir)
    }
}

/// Best record under the sign-corrected value of `spec`; earliest iteration
/// wins exact ties. A record lacking the objective's signed value is an
/// error, never silently skipped.
pub fn best_record(
    records: &[ExperimentRecord],
    spec: ObjectiveSpec,
) -> Result<Option<&ExperimentRecord>, VolError> {
    let name = spec.kind.as_str();
    let mut best: Option<(&ExperimentRecord, f64)> = None;
    for record in records {
        let value = record
            .signed
            .get(name)
            .copied()
            .ok_or_else(|| missing_signed(name, record.iteration))?;
        match best {
            Some((_, incumbent)) if value <= incumbent => {}
            _ => best = Some((record, value)),
        }
    }
    Ok(best.map(|(record, _)| record))
}

fn record_signed(
    record: &ExperimentRecord,
    specs: &[ObjectiveSpec],
) -> Result<Vec<f64>, VolError> {
    specs
        .iter()
        .map(|spec| {
            record
                .signed
                .get(spec.kind.as_str())
                .copied()
                .ok_or_else(|| missing_signed(spec.kind.as_str(), record.iteration))
        })
        .collect()
}

fn missing_signed(objective: &str, iteration: usize) -> VolError {
    VolError::Campaign(
        ErrorInfo::new("front-missing-objective", "record lacks a signed value")
            .with_context("objective", objective.to_string())
            .with_context("iteration", iteration.to_string()),
    )
}

fn transition_error(action: &str, status: CampaignStatus) -> VolError {
    VolError::Campaign(
        ErrorInfo::new("bad-transition", "campaign is not in a state allowing this action")
            .with_context("action", action.to_string())
            .with_context("status", format!("{status:?}")),
    )
}
