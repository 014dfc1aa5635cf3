//! YAML-configurable campaign parameters.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use vol_core::errors::ErrorInfo;
use vol_core::{Direction, ObjectiveKind, ObjectiveSpec, Variable, VolError};
use vol_rig::{CampaignMode, RigSettings, SamplerSettings};

/// One requested objective, by catalog name, with its direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveRequest {
    /// Catalog name (`yield`, `throughput`, ...). Validated at start.
    pub name: String,
    /// Registered optimization direction.
    #[serde(default = "default_direction")]
    pub direction: Direction,
}

fn default_direction() -> Direction {
    Direction::Maximize
}

/// Deterministic seeding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedPolicy {
    /// Master seed used for backends and the reference optimizer.
    #[serde(default = "default_master_seed")]
    pub master_seed: u64,
    /// Optional label documented in checkpoint metadata.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_master_seed() -> u64 {
    0x05EE_D5EE_DD15_5EED_u64
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            master_seed: default_master_seed(),
            label: None,
        }
    }
}

/// Full configuration of one optimization campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Run name, also the checkpoint directory name.
    pub run_name: String,
    /// Hardware interaction mode.
    #[serde(default = "default_mode")]
    pub mode: CampaignMode,
    /// Search space axes. Immutable once the campaign starts.
    pub variables: Vec<Variable>,
    /// Objectives to optimize, one for single-objective campaigns, two or
    /// more for multi-objective campaigns.
    pub objectives: Vec<ObjectiveRequest>,
    /// Total iteration target.
    pub total_iterations: usize,
    /// Number of space-filling candidates before the optimizer exploits.
    #[serde(default = "default_initial_points")]
    pub initial_points: usize,
    /// Measurement convergence gate parameters.
    #[serde(default)]
    pub sampler: SamplerSettings,
    /// Rig precondition parameters (real mode only).
    #[serde(default)]
    pub rig: RigSettings,
    /// Root directory for per-run checkpoint artifacts.
    #[serde(default = "default_checkpoint_root")]
    pub checkpoint_root: PathBuf,
    /// Master seed and label.
    #[serde(default)]
    pub seed_policy: SeedPolicy,
}

fn default_mode() -> CampaignMode {
    CampaignMode::Simulated
}

fn default_initial_points() -> usize {
    5
}

fn default_checkpoint_root() -> PathBuf {
    PathBuf::from("runs")
}

impl CampaignConfig {
    /// Parses a configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, VolError> {
        serde_yaml::from_str(text)
            .map_err(|err| VolError::Config(ErrorInfo::new("config-parse", err.to_string())))
    }

    /// Loads a configuration from a YAML file.
    pub fn from_yaml_path(path: &Path) -> Result<Self, VolError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            VolError::Config(
                ErrorInfo::new("config-read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Validates the configuration and resolves objective names.
    ///
    /// All configuration errors surface here, before the campaign ever
    /// transitions to running.
    pub fn resolve_objectives(&self) -> Result<Vec<ObjectiveSpec>, VolError> {
        if self.run_name.trim().is_empty() {
            return Err(config_error("run-name-empty", "run name must not be empty"));
        }
        if self.variables.is_empty() {
            return Err(config_error(
                "variables-empty",
                "at least one variable is required",
            ));
        }
        let mut names = BTreeSet::new();
        for variable in &self.variables {
            variable.validate()?;
            if !names.insert(variable.name.as_str()) {
                return Err(VolError::Config(
                    ErrorInfo::new("variable-duplicate", "variable names must be unique")
                        .with_context("variable", variable.name.clone()),
                ));
            }
        }
        if self.objectives.is_empty() {
            return Err(config_error(
                "objectives-empty",
                "at least one objective is required",
            ));
        }
        if self.total_iterations == 0 {
            return Err(config_error(
                "iterations-zero",
                "total iteration target must be at least one",
            ));
        }
        let mut specs = Vec::with_capacity(self.objectives.len());
        let mut kinds = BTreeSet::new();
        for request in &self.objectives {
            let kind = ObjectiveKind::from_name(&request.name)?;
            if !kinds.insert(kind) {
                return Err(VolError::Config(
                    ErrorInfo::new("objective-duplicate", "objective requested twice")
                        .with_context("objective", request.name.clone()),
                ));
            }
            specs.push(ObjectiveSpec::new(kind, request.direction));
        }
        Ok(specs)
    }

    /// Whether the campaign optimizes two or more objectives.
    pub fn is_multi_objective(&self) -> bool {
        self.objectives.len() >= 2
    }

    /// Per-run artifact directory.
    pub fn run_directory(&self) -> PathBuf {
        self.checkpoint_root.join(&self.run_name)
    }

    /// SHA-256 of the canonical JSON form, recorded in checkpoint metadata.
    pub fn hash(&self) -> Result<String, VolError> {
        let json = serde_json::to_vec(self)
            .map_err(|err| VolError::Serde(ErrorInfo::new("config-hash", err.to_string())))?;
        let mut hasher = Sha256::new();
        hasher.update(&json);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn config_error(code: &str, message: &str) -> VolError {
    VolError::Config(ErrorInfo::new(code, message))
}
