//! Process backends: real rig, hybrid signal, full simulation.
//!
//! The campaign mode is resolved once at start into one `ProcessBackend`
//! implementation; the sequencer never branches on the mode again.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vol_core::errors::ErrorInfo;
use vol_core::{derive_substream_seed, RngHandle, VolError};

use crate::bridge::{tags, Clock, DeviceBridge};
use crate::objectives::{FlowDerivation, PARAM_ACID, PARAM_RESIDENCE_TIME};

/// Substream index for the hybrid signal noise stream.
const SUBSTREAM_HYBRID_SIGNAL: u64 = 1;
/// Substream index for the fully simulated signal stream.
const SUBSTREAM_SIMULATED_SIGNAL: u64 = 2;

/// How the campaign interacts with hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignMode {
    /// Drive the physical rig through the device bridge.
    Real,
    /// Run preconditions as no-ops and synthesize the signal from the
    /// candidate parameters.
    Hybrid,
    /// Bypass hardware and waits entirely; seeded random signal.
    Simulated,
}

/// Rig-specific precondition parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigSettings {
    /// Absolute chiller tolerance before the temperature is considered settled.
    #[serde(default = "default_temperature_tolerance")]
    pub temperature_tolerance: f64,
    /// Delay between chiller readback polls.
    #[serde(default = "default_poll_interval", with = "poll_secs")]
    pub poll_interval: Duration,
    /// Poll budget for the temperature settle loop.
    #[serde(default = "default_max_polls")]
    pub max_temperature_polls: usize,
    /// Carrier pump rate held constant during runs, in mL/min.
    #[serde(default = "default_carrier_flow")]
    pub carrier_flow: f64,
    /// Pressure controller setpoint applied during preconditioning.
    #[serde(default = "default_pressure_setpoint")]
    pub pressure_setpoint: f64,
    /// Fouling signal level above which the probe cleaning sequence runs.
    #[serde(default = "default_fouling_threshold")]
    pub fouling_threshold: f64,
    /// Flush pump rate used while cleaning, in mL/min.
    #[serde(default = "default_flush_flow")]
    pub flush_flow: f64,
    /// Dwell of each cleaning step.
    #[serde(default = "default_cleaning_dwell", with = "poll_secs")]
    pub cleaning_dwell: Duration,
    /// Settle duration as a multiple of the residence time.
    #[serde(default = "default_settle_multiplier")]
    pub settle_multiplier: f64,
}

fn default_temperature_tolerance() -> f64 {
    0.5
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_polls() -> usize {
    240
}

fn default_carrier_flow() -> f64 {
    0.2
}

fn default_pressure_setpoint() -> f64 {
    2.0
}

fn default_fouling_threshold() -> f64 {
    0.8
}

fn default_flush_flow() -> f64 {
    1.0
}

fn default_cleaning_dwell() -> Duration {
    Duration::from_secs(30)
}

fn default_settle_multiplier() -> f64 {
    2.0
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            temperature_tolerance: default_temperature_tolerance(),
            poll_interval: default_poll_interval(),
            max_temperature_polls: default_max_polls(),
            carrier_flow: default_carrier_flow(),
            pressure_setpoint: default_pressure_setpoint(),
            fouling_threshold: default_fouling_threshold(),
            flush_flow: default_flush_flow(),
            cleaning_dwell: default_cleaning_dwell(),
            settle_multiplier: default_settle_multiplier(),
        }
    }
}

/// Precondition / acquire / teardown capability set selected at campaign start.
pub trait ProcessBackend {
    /// Brings the process to the candidate's conditions.
    fn precondition(
        &mut self,
        parameters: &BTreeMap<String, f64>,
        clock: &mut dyn Clock,
    ) -> Result<(), VolError>;

    /// Waits for steady state before sampling.
    fn settle(
        &mut self,
        parameters: &BTreeMap<String, f64>,
        clock: &mut dyn Clock,
    ) -> Result<(), VolError>;

    /// Draws one raw signal sample.
    fn read_signal(&mut self, parameters: &BTreeMap<String, f64>) -> Result<f64, VolError>;

    /// Stops all actuators. Must be safe to call on any exit path.
    fn teardown(&mut self) -> Result<(), VolError>;
}

/// Backend driving the physical rig through a [`DeviceBridge`].
pub struct RealBackend {
    bridge: Box<dyn DeviceBridge>,
    settings: RigSettings,
}

impl RealBackend {
    /// Wraps a bridge connection with the given rig settings.
    pub fn new(bridge: Box<dyn DeviceBridge>, settings: RigSettings) -> Self {
        Self { bridge, settings }
    }

    fn settle_temperature(
        &mut self,
        target: f64,
        clock: &mut dyn Clock,
    ) -> Result<(), VolError> {
        self.bridge.write(tags::CHILLER_ON, 1.0)?;
        self.bridge.write(tags::CHILLER_SETPOINT, target)?;
        for _ in 0..self.settings.max_temperature_polls {
            let current = self.bridge.read(tags::CHILLER_READBACK)?;
            if (current - target).abs() <= self.settings.temperature_tolerance {
                return Ok(());
            }
            clock.sleep(self.settings.poll_interval);
        }
        Err(VolError::Bridge(
            ErrorInfo::new("temperature-settle", "chiller did not reach the setpoint")
                .with_context("target", target.to_string())
                .with_context("polls", self.settings.max_temperature_polls.to_string())
                .with_hint("check chiller capacity or raise max_temperature_polls"),
        ))
    }

    fn set_pump_flows(&mut self, flows: &FlowDerivation) -> Result<(), VolError> {
        let acid_flow = flows.acid_fraction * flows.flow_aq;
        let plain_flow = (1.0 - flows.acid_fraction) * flows.flow_aq;
        self.bridge.write(tags::PUMP_3, self.settings.carrier_flow)?;
        self.bridge.write(tags::PUMP_2, round2(plain_flow))?;
        self.bridge.write(tags::PUMP_5, round2(acid_flow))?;
        Ok(())
    }

    fn clean_probe_if_fouled(&mut self, clock: &mut dyn Clock) -> Result<(), VolError> {
        let fouling = self.bridge.read(tags::PROBE_FOULING)?;
        if fouling <= self.settings.fouling_threshold {
            return Ok(());
        }
        // Fixed flush sequence: run the flush pump, dwell, stop, dwell.
        self.bridge.write(tags::PUMP_1, self.settings.flush_flow)?;
        clock.sleep(self.settings.cleaning_dwell);
        self.bridge.write(tags::PUMP_1, 0.0)?;
        clock.sleep(self.settings.cleaning_dwell);
        Ok(())
    }
}

impl ProcessBackend for RealBackend {
    fn precondition(
        &mut self,
        parameters: &BTreeMap<String, f64>,
        clock: &mut dyn Clock,
    ) -> Result<(), VolError> {
        if !self.bridge.is_reachable(tags::CHILLER_READBACK) {
            return Err(VolError::Bridge(
                ErrorInfo::new("device-unreachable", "rig did not answer the connection probe")
                    .with_context("tag", tags::CHILLER_READBACK.to_string()),
            ));
        }
        if let Some(target) = parameters.get("temperature").copied() {
            self.settle_temperature(target, clock)?;
        }
        let flows = FlowDerivation::from_parameters(parameters);
        self.set_pump_flows(&flows)?;
        self.bridge
            .write(tags::PRESSURE_OUT, self.settings.pressure_setpoint)?;
        self.clean_probe_if_fouled(clock)
    }

    fn settle(
        &mut self,
        parameters: &BTreeMap<String, f64>,
        clock: &mut dyn Clock,
    ) -> Result<(), VolError> {
        let residence_time = parameters
            .get(PARAM_RESIDENCE_TIME)
            .copied()
            .filter(|value| *value > 0.0)
            .unwrap_or(60.0);
        let seconds = self.settings.settle_multiplier * residence_time;
        clock.sleep(Duration::from_secs_f64(seconds.max(0.0)));
        Ok(())
    }

    fn read_signal(&mut self, _parameters: &BTreeMap<String, f64>) -> Result<f64, VolError> {
        self.bridge.read(tags::SIGNAL_AREA)
    }

    fn teardown(&mut self) -> Result<(), VolError> {
        let mut first_failure = None;
        for tag in [
            tags::PUMP_1,
            tags::PUMP_2,
            tags::PUMP_3,
            tags::PUMP_5,
            tags::PRESSURE_OUT,
        ] {
            if let Err(err) = self.bridge.write(tag, 0.0) {
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Device-independent backend: preconditions are no-ops and the signal is a
/// deterministic function of the candidate parameters plus seeded noise.
pub struct HybridBackend {
    rng: RngHandle,
}

impl HybridBackend {
    /// Creates a hybrid backend from the campaign master seed.
    pub fn new(master_seed: u64) -> Self {
        Self {
            rng: RngHandle::from_seed(derive_substream_seed(
                master_seed,
                SUBSTREAM_HYBRID_SIGNAL,
            )),
        }
    }
}

impl ProcessBackend for HybridBackend {
    fn precondition(
        &mut self,
        _parameters: &BTreeMap<String, f64>,
        _clock: &mut dyn Clock,
    ) -> Result<(), VolError> {
        Ok(())
    }

    fn settle(
        &mut self,
        _parameters: &BTreeMap<String, f64>,
        _clock: &mut dyn Clock,
    ) -> Result<(), VolError> {
        Ok(())
    }

    fn read_signal(&mut self, parameters: &BTreeMap<String, f64>) -> Result<f64, VolError> {
        // Response surface with an optimum near 70 degC and a 30 s residence
        // time, scaled to the 3.0..3.1 band the probe reports in practice.
        let temperature = parameters.get("temperature").copied().unwrap_or(70.0);
        let residence_time = parameters.get(PARAM_RESIDENCE_TIME).copied().unwrap_or(30.0);
        let acid = parameters.get(PARAM_ACID).copied().unwrap_or(0.5);
        let surface = (-((temperature - 70.0).powi(2)) / 100.0).exp()
            * (-((residence_time - 30.0).powi(2)) / 200.0).exp()
            * (1.0 - (acid - 0.5).abs());
        Ok(3.0 * surface + self.rng.uniform_in(0.0, 0.1))
    }

    fn teardown(&mut self) -> Result<(), VolError> {
        Ok(())
    }
}

/// Fully simulated backend: no hardware, no waits, seeded signal draws.
pub struct SimulatedBackend {
    rng: RngHandle,
}

impl SimulatedBackend {
    /// Creates a simulated backend from the campaign master seed.
    pub fn new(master_seed: u64) -> Self {
        Self {
            rng: RngHandle::from_seed(derive_substream_seed(
                master_seed,
                SUBSTREAM_SIMULATED_SIGNAL,
            )),
        }
    }
}

impl ProcessBackend for SimulatedBackend {
    fn precondition(
        &mut self,
        _parameters: &BTreeMap<String, f64>,
        _clock: &mut dyn Clock,
    ) -> Result<(), VolError> {
        Ok(())
    }

    fn settle(
        &mut self,
        _parameters: &BTreeMap<String, f64>,
        _clock: &mut dyn Clock,
    ) -> Result<(), VolError> {
        Ok(())
    }

    fn read_signal(&mut self, _parameters: &BTreeMap<String, f64>) -> Result<f64, VolError> {
        Ok(self.rng.uniform_in(3.0, 3.1))
    }

    fn teardown(&mut self) -> Result<(), VolError> {
        Ok(())
    }
}

/// Resolves the campaign mode into a backend instance.
///
/// `Real` mode requires a bridge connection; the other modes ignore it.
pub fn backend_for_mode(
    mode: CampaignMode,
    bridge: Option<Box<dyn DeviceBridge>>,
    settings: RigSettings,
    master_seed: u64,
) -> Result<Box<dyn ProcessBackend>, VolError> {
    match mode {
        CampaignMode::Real => match bridge {
            Some(bridge) => Ok(Box::new(RealBackend::new(bridge, settings))),
            None => Err(VolError::Config(
                ErrorInfo::new("bridge-missing", "real mode requires a device bridge")
                    .with_hint("pass a bridge connection or switch to hybrid/simulated mode"),
            )),
        },
        CampaignMode::Hybrid => Ok(Box::new(HybridBackend::new(master_seed))),
        CampaignMode::Simulated => Ok(Box::new(SimulatedBackend::new(master_seed))),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

mod poll_secs {
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
