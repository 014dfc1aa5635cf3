use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use vol_campaign::checkpoint::{self, CheckpointPayload};
use vol_campaign::config::{CampaignConfig, ObjectiveRequest, SeedPolicy};
use vol_campaign::controller::{CampaignController, StepOutcome};
use vol_campaign::optimizer::RandomSearchOptimizer;
use vol_core::errors::ErrorInfo;
use vol_core::{CampaignStatus, Direction, Variable, VolError};
use vol_rig::backend::CampaignMode;
use vol_rig::bridge::{tags, Clock, DeviceBridge};
use vol_rig::sampler::{RetryPolicy, SamplerSettings};

#[derive(Default)]
struct TestClock;

impl Clock for TestClock {
    fn sleep(&mut self, _duration: Duration) {}
}

fn fast_sampler() -> SamplerSettings {
    SamplerSettings {
        min_samples: 3,
        rsd_threshold_pct: 50.0,
        max_samples: 3,
        inter_sample_delay: Duration::ZERO,
        retry: RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        },
    }
}

fn config(root: &Path, run_name: &str, mode: CampaignMode, total: usize) -> CampaignConfig {
    CampaignConfig {
        run_name: run_name.to_string(),
        mode,
        variables: vec![
            Variable::continuous("residence_time", 30.0, 120.0, "s"),
            Variable::continuous("acid", 0.0, 1.0, ""),
        ],
        objectives: vec![ObjectiveRequest {
            name: "yield".to_string(),
            direction: Direction::Maximize,
        }],
        total_iterations: total,
        // Space-filling for the whole run keeps candidate sequences
        // independent of what the backend happened to measure.
        initial_points: total,
        sampler: fast_sampler(),
        rig: Default::default(),
        checkpoint_root: root.to_path_buf(),
        seed_policy: SeedPolicy {
            master_seed: 41,
            label: None,
        },
    }
}

fn start(config: CampaignConfig, bridge: Option<Box<dyn DeviceBridge>>) -> CampaignController {
    let specs = config.resolve_objectives().unwrap();
    let optimizer = Box::new(RandomSearchOptimizer::new(
        &config.variables,
        specs.len(),
        config.initial_points,
        config.seed_policy.master_seed,
    ));
    CampaignController::start_with_optimizer(config, optimizer, bridge, Box::new(TestClock))
        .unwrap()
}

fn resume(root: &Path, run_name: &str, bridge: Option<Box<dyn DeviceBridge>>) -> CampaignController {
    let optimizer = Box::new(RandomSearchOptimizer::new(&[], 0, 1, 0));
    CampaignController::resume_with_optimizer(
        root,
        run_name,
        optimizer,
        bridge,
        Box::new(TestClock),
    )
    .unwrap()
}

#[test]
fn resumed_run_replays_the_uninterrupted_candidate_sequence() {
    let dir = TempDir::new().unwrap();
    let mut unbroken = start(config(dir.path(), "unbroken", CampaignMode::Simulated, 6), None);
    while unbroken.step().unwrap() != StepOutcome::Completed {}

    let mut first_half = start(config(dir.path(), "broken", CampaignMode::Simulated, 6), None);
    for _ in 0..3 {
        assert_eq!(first_half.step().unwrap(), StepOutcome::Advanced);
    }
    drop(first_half);

    let mut second_half = resume(dir.path(), "broken", None);
    assert_eq!(second_half.iteration(), 3);
    while second_half.step().unwrap() != StepOutcome::Completed {}

    let replayed: Vec<_> = second_half
        .records()
        .iter()
        .map(|record| record.parameters.clone())
        .collect();
    let reference: Vec<_> = unbroken
        .records()
        .iter()
        .map(|record| record.parameters.clone())
        .collect();
    assert_eq!(replayed, reference);
}

#[test]
fn fresh_campaign_is_resumable_before_any_step() {
    let dir = TempDir::new().unwrap();
    let controller = start(config(dir.path(), "baseline", CampaignMode::Simulated, 4), None);
    let run_dir = controller.run_directory().to_path_buf();
    drop(controller);
    let live = run_dir.join(checkpoint::CHECKPOINT_DIR);
    assert!(live.join(checkpoint::METADATA_FILE).is_file());
    assert!(live.join(checkpoint::OPTIMIZER_FILE).is_file());
    assert!(live.join(checkpoint::RECORDS_FILE).is_file());
    // The swap cleans up after itself.
    assert!(!run_dir.join(checkpoint::STAGING_DIR).exists());
    assert!(!run_dir.join(checkpoint::BACKUP_DIR).exists());

    let mut resumed = resume(dir.path(), "baseline", None);
    assert_eq!(resumed.iteration(), 0);
    assert!(resumed.records().is_empty());
    assert_eq!(resumed.step().unwrap(), StepOutcome::Advanced);
}

#[test]
fn completed_campaign_stays_completed_after_resume() {
    let dir = TempDir::new().unwrap();
    let mut controller = start(config(dir.path(), "done", CampaignMode::Simulated, 2), None);
    while controller.step().unwrap() != StepOutcome::Completed {}
    assert!(controller.run_directory().join("summary.json").is_file());
    drop(controller);

    let mut resumed = resume(dir.path(), "done", None);
    assert_eq!(resumed.status(), CampaignStatus::Completed);
    let err = resumed.step().unwrap_err();
    assert_eq!(err.info().code, "not-running");
}

#[test]
fn torn_checkpoint_is_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let controller = start(config(dir.path(), "torn", CampaignMode::Simulated, 4), None);
    let run_dir = controller.run_directory().to_path_buf();
    drop(controller);

    // A metadata record claiming more iterations than the record table holds
    // is what a save torn between the table write and the metadata write
    // looks like.
    let mut payload = CheckpointPayload::load(&run_dir).unwrap();
    payload.metadata.iteration = 3;
    payload.metadata.observed = 3;
    payload.store(&run_dir).unwrap();
    let err = CheckpointPayload::load(&run_dir).unwrap_err();
    assert_eq!(err.info().code, "checkpoint-inconsistent");
}

#[test]
fn save_torn_before_the_swap_leaves_the_last_checkpoint_live() {
    let dir = TempDir::new().unwrap();
    let mut controller = start(config(dir.path(), "torn-staging", CampaignMode::Simulated, 6), None);
    controller.step().unwrap();
    controller.step().unwrap();
    let run_dir = controller.run_directory().to_path_buf();
    drop(controller);

    // A crash while the next save was still being assembled leaves a partial
    // staging directory (no metadata record) next to an intact live one.
    let staging = run_dir.join(checkpoint::STAGING_DIR);
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join(checkpoint::OPTIMIZER_FILE), b"partial").unwrap();

    let mut resumed = resume(dir.path(), "torn-staging", None);
    assert_eq!(resumed.iteration(), 2);
    assert_eq!(resumed.step().unwrap(), StepOutcome::Advanced);
}

#[test]
fn interrupted_swap_promotes_the_staged_checkpoint() {
    let dir = TempDir::new().unwrap();
    let mut controller = start(config(dir.path(), "mid-swap", CampaignMode::Simulated, 6), None);
    for _ in 0..3 {
        controller.step().unwrap();
    }
    let run_dir = controller.run_directory().to_path_buf();
    drop(controller);

    // A crash between demoting the live directory and promoting the staged
    // one: live is gone, the staged checkpoint is complete.
    std::fs::rename(
        run_dir.join(checkpoint::CHECKPOINT_DIR),
        run_dir.join(checkpoint::STAGING_DIR),
    )
    .unwrap();

    let resumed = resume(dir.path(), "mid-swap", None);
    assert_eq!(resumed.iteration(), 3);
    assert!(run_dir.join(checkpoint::CHECKPOINT_DIR).is_dir());
}

#[test]
fn interrupted_swap_falls_back_to_the_demoted_checkpoint() {
    let dir = TempDir::new().unwrap();
    let mut controller = start(config(dir.path(), "mid-demote", CampaignMode::Simulated, 6), None);
    controller.step().unwrap();
    let run_dir = controller.run_directory().to_path_buf();
    drop(controller);

    // A crash right after the live directory was demoted, before the staged
    // replacement existed.
    std::fs::rename(
        run_dir.join(checkpoint::CHECKPOINT_DIR),
        run_dir.join(checkpoint::BACKUP_DIR),
    )
    .unwrap();

    let resumed = resume(dir.path(), "mid-demote", None);
    assert_eq!(resumed.iteration(), 1);
}

#[test]
fn resume_from_a_relocated_root_writes_to_the_new_root() {
    let old_root = TempDir::new().unwrap();
    let new_root = TempDir::new().unwrap();
    let mut controller = start(config(old_root.path(), "moved", CampaignMode::Simulated, 6), None);
    controller.step().unwrap();
    controller.step().unwrap();
    drop(controller);

    std::fs::rename(old_root.path().join("moved"), new_root.path().join("moved")).unwrap();

    let mut resumed = resume(new_root.path(), "moved", None);
    resumed.step().unwrap();
    drop(resumed);

    let payload =
        CheckpointPayload::load(&checkpoint::run_directory(new_root.path(), "moved")).unwrap();
    assert_eq!(payload.metadata.iteration, 3);
    // Nothing came back to life under the old root.
    assert!(!old_root.path().join("moved").exists());
}

/// Bridge whose signal reads succeed a fixed number of times, then fail.
struct FailingBridge {
    signal_budget: usize,
}

impl DeviceBridge for FailingBridge {
    fn read(&mut self, tag: &str) -> Result<f64, VolError> {
        match tag {
            tags::PROBE_FOULING => Ok(0.0),
            tags::SIGNAL_AREA => {
                if self.signal_budget == 0 {
                    return Err(VolError::Bridge(ErrorInfo::new(
                        "probe-offline",
                        "analyser stopped responding",
                    )));
                }
                self.signal_budget -= 1;
                Ok(3.05)
            }
            other => Err(VolError::Bridge(
                ErrorInfo::new("unknown-tag", "unscripted read").with_context("tag", other),
            )),
        }
    }

    fn write(&mut self, _tag: &str, _value: f64) -> Result<(), VolError> {
        Ok(())
    }

    fn is_reachable(&mut self, _tag: &str) -> bool {
        true
    }
}

#[test]
fn mid_campaign_failure_resumes_from_the_last_completed_iteration() {
    let dir = TempDir::new().unwrap();
    // Three samples per iteration: an 18-read budget carries exactly six
    // iterations, and the seventh fails during acquisition.
    let bridge = Box::new(FailingBridge { signal_budget: 18 });
    let mut controller = start(
        config(dir.path(), "interrupted", CampaignMode::Real, 10),
        Some(bridge),
    );
    for _ in 0..6 {
        assert_eq!(controller.step().unwrap(), StepOutcome::Advanced);
    }
    let err = controller.step().unwrap_err();
    assert_eq!(err.info().code, "measurement-unavailable");
    assert_eq!(controller.status(), CampaignStatus::Paused);
    // The failed iteration left no record behind.
    assert_eq!(controller.records().len(), 6);
    drop(controller);

    let payload =
        CheckpointPayload::load(&checkpoint::run_directory(dir.path(), "interrupted")).unwrap();
    assert_eq!(payload.metadata.iteration, 6);
    assert_eq!(payload.records.len(), 6);

    let healthy = Box::new(FailingBridge { signal_budget: usize::MAX });
    let mut resumed = resume(dir.path(), "interrupted", Some(healthy));
    assert_eq!(resumed.iteration(), 6);
    assert_eq!(resumed.step().unwrap(), StepOutcome::Advanced);
    assert_eq!(resumed.records().last().unwrap().iteration, 7);
}

#[test]
fn audit_log_survives_a_resume_without_a_second_header() {
    let dir = TempDir::new().unwrap();
    let mut controller = start(config(dir.path(), "audited", CampaignMode::Simulated, 4), None);
    controller.step().unwrap();
    let run_dir = controller.run_directory().to_path_buf();
    drop(controller);

    let mut resumed = resume(dir.path(), "audited", None);
    resumed.step().unwrap();
    drop(resumed);

    let audit = std::fs::read_to_string(run_dir.join(checkpoint::AUDIT_FILE)).unwrap();
    let headers = audit
        .lines()
        .filter(|line| line.starts_with("iteration,"))
        .count();
    assert_eq!(headers, 1);
    // Two iterations at three samples each.
    assert_eq!(audit.lines().count(), 7);
}
