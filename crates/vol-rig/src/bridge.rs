//! Device bridge contract and rig tag catalog.

use std::time::Duration;

use vol_core::VolError;

/// Well-known tags on the flow rig.
///
/// The campaign engine never interprets these strings; they are forwarded to
/// the bridge implementation verbatim.
pub mod tags {
    /// Chiller enable switch.
    pub const CHILLER_ON: &str = "CHILLER_01.ON";
    /// Chiller temperature setpoint.
    pub const CHILLER_SETPOINT: &str = "CHILLER_01.W1";
    /// Chiller temperature readback.
    pub const CHILLER_READBACK: &str = "CHILLER_01.X1";
    /// Auxiliary pump (flush line).
    pub const PUMP_1: &str = "PUMP1.W1";
    /// Aqueous pump, acid-free stream.
    pub const PUMP_2: &str = "PUMP2.W1";
    /// Carrier pump, fixed rate during runs.
    pub const PUMP_3: &str = "PUMP_3";
    /// Aqueous pump, acid stream.
    pub const PUMP_5: &str = "PUMP5.W1";
    /// Pressure controller output.
    pub const PRESSURE_OUT: &str = "PC_OUT";
    /// Probe fouling signal used to trigger the cleaning sub-sequence.
    pub const PROBE_FOULING: &str = "PROBE.FOULING";
    /// FT-IR product signal area.
    pub const SIGNAL_AREA: &str = "FTIR.AREA";
}

/// Synchronous connection to the physical or simulated rig.
///
/// All calls may block. The bridge is a singleton exclusively owned by the
/// running campaign; implementations do not need to be thread safe.
pub trait DeviceBridge {
    /// Reads the current value of a tag.
    fn read(&mut self, tag: &str) -> Result<f64, VolError>;

    /// Writes a value to a tag.
    fn write(&mut self, tag: &str, value: f64) -> Result<(), VolError>;

    /// Whether the server answers for the given tag.
    fn is_reachable(&mut self, tag: &str) -> bool;
}

/// Source of blocking waits, injectable so tests run without sleeping.
pub trait Clock {
    /// Blocks the caller for the given duration.
    fn sleep(&mut self, duration: Duration);
}

/// Wall-clock implementation backed by [`std::thread::sleep`].
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
