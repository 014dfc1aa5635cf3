#![deny(missing_docs)]
#![doc = "Shared data model and utilities for the VOL campaign engine."]

pub mod errors;
pub mod rng;
pub mod schema;
mod types;

pub use errors::{ErrorInfo, VolError};
pub use rng::{derive_substream_seed, RngHandle};
pub use schema::SchemaVersion;
pub use types::{
    now_timestamp, CampaignStatus, CandidatePoint, Direction, ExperimentRecord, ObjectiveKind,
    ObjectiveSpec, Variable, VariableKind,
};
