use std::time::Duration;

use proptest::prelude::*;
use vol_core::errors::ErrorInfo;
use vol_core::VolError;
use vol_rig::bridge::Clock;
use vol_rig::sampler::{sample, window_rsd, RetryPolicy, SamplerSettings};

/// Clock that records requested delays instead of sleeping.
#[derive(Default)]
struct TestClock {
    slept: Vec<Duration>,
}

impl Clock for TestClock {
    fn sleep(&mut self, duration: Duration) {
        self.slept.push(duration);
    }
}

fn settings(threshold: f64, max_samples: usize) -> SamplerSettings {
    SamplerSettings {
        min_samples: 3,
        rsd_threshold_pct: threshold,
        max_samples,
        inter_sample_delay: Duration::from_secs(28),
        retry: RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        },
    }
}

fn scripted(values: Vec<f64>) -> impl FnMut() -> Result<f64, VolError> {
    let mut queue = values.into_iter();
    move || {
        queue.next().ok_or_else(|| {
            VolError::Measurement(ErrorInfo::new("script-exhausted", "no more samples"))
        })
    }
}

#[test]
fn identical_samples_converge_at_the_floor() {
    let mut clock = TestClock::default();
    let outcome = sample(
        scripted(vec![10.0, 10.0, 10.0]),
        &settings(2.0, 5),
        &mut clock,
        |_, _| Ok(()),
    )
    .unwrap();
    assert_eq!(outcome.samples, vec![10.0, 10.0, 10.0]);
    assert_eq!(outcome.mean, 10.0);
    assert!(outcome.converged);
}

#[test]
fn cap_reached_is_accepted_without_convergence() {
    // Window after 3 samples is [10, 12, 8] (RSD ~16.3%), after the 4th
    // [12, 8, 9] (~17.6%), after the 5th [8, 9, 9] (~5.4%) with the cap hit.
    let mut clock = TestClock::default();
    let outcome = sample(
        scripted(vec![10.0, 12.0, 8.0, 9.0, 9.0]),
        &settings(2.0, 5),
        &mut clock,
        |_, _| Ok(()),
    )
    .unwrap();
    assert_eq!(outcome.samples.len(), 5);
    assert!(!outcome.converged);
    assert!((outcome.mean - 26.0 / 3.0).abs() < 1e-9);
}

#[test]
fn rsd_uses_only_the_trailing_window() {
    let rsd = window_rsd(&[8.0, 9.0, 9.0]);
    assert!((rsd - 5.44).abs() < 0.05, "rsd was {rsd}");
}

#[test]
fn zero_mean_window_never_converges() {
    assert_eq!(window_rsd(&[0.0, 0.0, 0.0]), f64::INFINITY);
    let mut clock = TestClock::default();
    let outcome = sample(
        scripted(vec![0.0; 6]),
        &settings(2.0, 6),
        &mut clock,
        |_, _| Ok(()),
    )
    .unwrap();
    assert!(!outcome.converged);
    assert_eq!(outcome.samples.len(), 6);
}

#[test]
fn every_sample_reaches_the_audit_hook() {
    let mut clock = TestClock::default();
    let mut audited = Vec::new();
    let outcome = sample(
        scripted(vec![10.0, 12.0, 8.0, 9.0, 9.0]),
        &settings(2.0, 5),
        &mut clock,
        |index, value| {
            audited.push((index, value));
            Ok(())
        },
    )
    .unwrap();
    assert_eq!(audited.len(), outcome.samples.len());
    assert_eq!(audited[3], (3, 9.0));
}

#[test]
fn transient_failures_are_retried_then_escalated() {
    let mut clock = TestClock::default();
    let mut calls = 0usize;
    let outcome = sample(
        || {
            calls += 1;
            if calls == 2 {
                Err(VolError::Bridge(ErrorInfo::new("read-drop", "flaky link")))
            } else {
                Ok(5.0)
            }
        },
        &settings(2.0, 5),
        &mut clock,
        |_, _| Ok(()),
    )
    .unwrap();
    assert!(outcome.converged);

    // A permanently failing source escalates to a measurement error.
    let mut clock = TestClock::default();
    let err = sample(
        || -> Result<f64, VolError> {
            Err(VolError::Bridge(ErrorInfo::new("read-drop", "link down")))
        },
        &settings(2.0, 5),
        &mut clock,
        |_, _| Ok(()),
    )
    .unwrap_err();
    assert!(matches!(err, VolError::Measurement(_)));
    assert_eq!(err.info().code, "measurement-unavailable");
}

#[test]
fn non_finite_readings_count_as_failures() {
    let mut clock = TestClock::default();
    let err = sample(
        scripted(vec![f64::NAN; 9]),
        &settings(2.0, 5),
        &mut clock,
        |_, _| Ok(()),
    )
    .unwrap_err();
    assert_eq!(err.info().code, "measurement-unavailable");
}

proptest! {
    #[test]
    fn floor_is_unconditional(values in prop::collection::vec(1.0f64..100.0, 3..12)) {
        let mut clock = TestClock::default();
        let outcome = sample(
            scripted(values),
            &settings(1000.0, 12),
            &mut clock,
            |_, _| Ok(()),
        ).unwrap();
        // Even a threshold the first window trivially passes draws the floor.
        prop_assert!(outcome.samples.len() >= 3);
    }

    #[test]
    fn convergence_implies_gate_passed(values in prop::collection::vec(1.0f64..100.0, 10)) {
        let mut clock = TestClock::default();
        let outcome = sample(
            scripted(values),
            &settings(5.0, 10),
            &mut clock,
            |_, _| Ok(()),
        ).unwrap();
        let window = &outcome.samples[outcome.samples.len() - 3..];
        if outcome.converged {
            prop_assert!(window_rsd(window) < 5.0);
        } else {
            prop_assert_eq!(outcome.samples.len(), 10);
        }
    }
}
