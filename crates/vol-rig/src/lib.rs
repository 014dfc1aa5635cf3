#![deny(missing_docs)]
#![doc = "Rig-facing half of the VOL campaign engine: device bridge, process backends, adaptive sampling and experiment sequencing."]

/// Append-only raw sample audit log.
pub mod audit;
/// Process backend trait and the real / hybrid / simulated implementations.
pub mod backend;
/// Device bridge and clock contracts plus the rig tag catalog.
pub mod bridge;
/// Objective derivation and flow quantities.
pub mod objectives;
/// Sliding-window convergence-gated sampling.
pub mod sampler;
/// Per-iteration phase machine.
pub mod sequencer;

pub use audit::AuditLog;
pub use backend::{
    backend_for_mode, CampaignMode, HybridBackend, ProcessBackend, RealBackend, RigSettings,
    SimulatedBackend,
};
pub use bridge::{Clock, DeviceBridge, SystemClock};
pub use objectives::{evaluate, EvaluatedObjectives, FlowDerivation, REACTOR_VOLUME_ML};
pub use sampler::{sample, window_rsd, RetryPolicy, SampleOutcome, SamplerSettings};
pub use sequencer::{ExperimentSequencer, SequencedMeasurement, SequencerPhase};
