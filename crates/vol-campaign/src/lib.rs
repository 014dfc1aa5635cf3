#![deny(missing_docs)]
#![doc = "Campaign controller for the VOL engine: ask/tell loop, Pareto extraction and durable checkpoints."]

/// Three-artifact checkpoint payloads and the run directory layout.
pub mod checkpoint;
/// YAML campaign configuration schema and validation.
pub mod config;
/// Campaign lifecycle state machine and the iteration loop.
pub mod controller;
/// Optimizer ask/tell contract and the seeded reference search.
pub mod optimizer;
/// Non-dominated front extraction.
pub mod pareto;

pub use checkpoint::{CheckpointMetadata, CheckpointPayload};
pub use config::{CampaignConfig, ObjectiveRequest, SeedPolicy};
pub use controller::{best_record, CampaignController, CampaignOutcome, StepOutcome};
pub use optimizer::{AskTellOptimizer, RandomSearchOptimizer};
pub use pareto::{dominates, front};
