//! Adaptive measurement sampling under noise.
//!
//! Samples are drawn until the relative standard deviation of a sliding
//! window of the most recent `min_samples` readings drops below a threshold,
//! or a hard sample cap is reached. The window deliberately favours recency:
//! the gate looks only at the trailing window, never at the full history.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vol_core::errors::ErrorInfo;
use vol_core::VolError;

use crate::bridge::Clock;

/// Bounded retry policy applied to every raw read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per sample, including the first.
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: usize,
    /// Fixed delay between attempts.
    #[serde(default = "default_retry_delay", with = "duration_secs")]
    pub delay: Duration,
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            delay: default_retry_delay(),
        }
    }
}

/// Convergence gate parameters for one measurement window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerSettings {
    /// Unconditional sample floor; also the sliding window width.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Relative standard deviation threshold, in percent.
    #[serde(default = "default_rsd_threshold")]
    pub rsd_threshold_pct: f64,
    /// Hard cap on samples per window.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Wait between consecutive samples.
    #[serde(default = "default_inter_sample_delay", with = "duration_secs")]
    pub inter_sample_delay: Duration,
    /// Retry policy for individual reads.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_min_samples() -> usize {
    3
}

fn default_rsd_threshold() -> f64 {
    2.0
}

fn default_max_samples() -> usize {
    10
}

fn default_inter_sample_delay() -> Duration {
    Duration::from_secs(28)
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            rsd_threshold_pct: default_rsd_threshold(),
            max_samples: default_max_samples(),
            inter_sample_delay: default_inter_sample_delay(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one measurement window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    /// Mean of the final sliding window.
    pub mean: f64,
    /// Every raw sample drawn, in order, for audit purposes.
    pub samples: Vec<f64>,
    /// Whether the gate passed before the cap was reached.
    pub converged: bool,
}

/// Population relative standard deviation of a window, in percent.
///
/// A zero mean yields infinity, which never satisfies the gate.
pub fn window_rsd(window: &[f64]) -> f64 {
    if window.is_empty() {
        return f64::INFINITY;
    }
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    if mean == 0.0 {
        return f64::INFINITY;
    }
    let variance = window
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / window.len() as f64;
    (variance.sqrt() / mean.abs()) * 100.0
}

/// Draws samples until the sliding-window RSD gate passes or the cap is hit.
///
/// `read` supplies one raw sample per call; failures and non-finite readings
/// are retried per `settings.retry` before escalating. `on_sample` is invoked
/// for every accepted raw sample with its index within the window, regardless
/// of convergence outcome (audit hook).
pub fn sample<R, A>(
    mut read: R,
    settings: &SamplerSettings,
    clock: &mut dyn Clock,
    mut on_sample: A,
) -> Result<SampleOutcome, VolError>
where
    R: FnMut() -> Result<f64, VolError>,
    A: FnMut(usize, f64) -> Result<(), VolError>,
{
    if settings.min_samples == 0 || settings.max_samples < settings.min_samples {
        return Err(VolError::Config(
            ErrorInfo::new("sampler-window", "sample window bounds are inconsistent")
                .with_context("min_samples", settings.min_samples.to_string())
                .with_context("max_samples", settings.max_samples.to_string()),
        ));
    }

    let mut samples = Vec::with_capacity(settings.min_samples);
    // Unconditional floor: no early exit before `min_samples` readings.
    for index in 0..settings.min_samples {
        if index > 0 {
            clock.sleep(settings.inter_sample_delay);
        }
        let value = read_with_retry(&mut read, &settings.retry, clock)?;
        on_sample(index, value)?;
        samples.push(value);
    }

    let mut rsd = window_rsd(&samples[samples.len() - settings.min_samples..]);
    while rsd >= settings.rsd_threshold_pct && samples.len() < settings.max_samples {
        clock.sleep(settings.inter_sample_delay);
        let value = read_with_retry(&mut read, &settings.retry, clock)?;
        on_sample(samples.len(), value)?;
        samples.push(value);
        rsd = window_rsd(&samples[samples.len() - settings.min_samples..]);
    }

    let window = &samples[samples.len() - settings.min_samples..];
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    Ok(SampleOutcome {
        mean,
        samples,
        converged: rsd < settings.rsd_threshold_pct,
    })
}

fn read_with_retry<R>(
    read: &mut R,
    retry: &RetryPolicy,
    clock: &mut dyn Clock,
) -> Result<f64, VolError>
where
    R: FnMut() -> Result<f64, VolError>,
{
    let mut last_failure = String::from("no attempts made");
    for attempt in 0..retry.max_attempts.max(1) {
        if attempt > 0 {
            clock.sleep(retry.delay);
        }
        match read() {
            Ok(value) if value.is_finite() => return Ok(value),
            Ok(value) => {
                last_failure = format!("non-finite reading: {value}");
            }
            Err(err) => {
                last_failure = err.info().message.clone();
            }
        }
    }
    Err(VolError::Measurement(
        ErrorInfo::new("measurement-unavailable", "signal read failed after retries")
            .with_context("attempts", retry.max_attempts.max(1).to_string())
            .with_context("last_failure", last_failure)
            .with_hint("check the signal source, then resume the campaign"),
    ))
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(seconds))
    }
}
