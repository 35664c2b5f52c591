//! Sensor and output port.
//!
//! The readout loop and the intercom handler talk to hardware through
//! the [`InputOutput`] trait only. Two drivers ship with the daemon: a
//! null driver for hosts without hardware and a simulated plant for
//! development and integration tests. Real transducer buses plug in
//! behind the same trait.

use crate::core::error::IoError;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// One readout: sensor/derived-value name to reading.
pub type Snapshot = BTreeMap<String, f64>;

/// Hardware abstraction for sensors and output channels.
pub trait InputOutput: Send + Sync {
    /// Read every available sensor. Called once per readout cycle.
    fn read_all(&self) -> Result<Snapshot, IoError>;

    /// Drive a named output channel.
    fn write(&self, channel: &str, value: f64) -> Result<(), IoError>;

    /// Free-form device command (e.g. a sensor rescan trigger).
    fn execute(&self, command: &str) -> Result<(), IoError>;

    /// Re-enumerate attached devices. Drivers without a hardware link
    /// report [`IoError::NotSupported`].
    fn enumerate(&self) -> Result<(), IoError> {
        Err(IoError::NotSupported)
    }

    /// Release the hardware on shutdown.
    fn close(&self) {}
}

/// Driver for hosts without any attached hardware: no sensors, no
/// output channels.
pub struct NullInputOutput;

impl InputOutput for NullInputOutput {
    fn read_all(&self) -> Result<Snapshot, IoError> {
        Ok(Snapshot::new())
    }

    fn write(&self, channel: &str, _value: f64) -> Result<(), IoError> {
        Err(IoError::ChannelUnknown(channel.to_string()))
    }

    fn execute(&self, _command: &str) -> Result<(), IoError> {
        Ok(())
    }
}

/// Deterministic plant model: two sensors and two output channels.
///
/// Each sensor relaxes toward a baseline plus the commanded output of
/// the matching channel, so closed-loop behavior is observable without
/// hardware.
pub struct SimulatedInputOutput {
    state: RwLock<SimState>,
}

struct SimState {
    readings: BTreeMap<String, f64>,
    outputs: BTreeMap<String, f64>,
}

const SIM_BASELINE: f64 = 20.0;
const SIM_GAIN: f64 = 0.5;
const SIM_RELAX: f64 = 0.2;

impl SimulatedInputOutput {
    pub fn new() -> Self {
        let mut readings = BTreeMap::new();
        readings.insert("sensor0".to_string(), SIM_BASELINE);
        readings.insert("sensor1".to_string(), SIM_BASELINE);
        let mut outputs = BTreeMap::new();
        outputs.insert("out0".to_string(), 0.0);
        outputs.insert("out1".to_string(), 0.0);
        Self {
            state: RwLock::new(SimState { readings, outputs }),
        }
    }
}

impl Default for SimulatedInputOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputOutput for SimulatedInputOutput {
    fn read_all(&self) -> Result<Snapshot, IoError> {
        let mut state = self.state.write();
        let outputs = state.outputs.clone();
        for (sensor, reading) in state.readings.iter_mut() {
            // sensorN is heated by outN.
            let channel = sensor.replace("sensor", "out");
            let drive = outputs.get(&channel).copied().unwrap_or(0.0);
            let target = SIM_BASELINE + SIM_GAIN * drive;
            *reading += SIM_RELAX * (target - *reading);
        }
        Ok(state.readings.clone())
    }

    fn write(&self, channel: &str, value: f64) -> Result<(), IoError> {
        let mut state = self.state.write();
        match state.outputs.get_mut(channel) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(IoError::ChannelUnknown(channel.to_string())),
        }
    }

    fn execute(&self, _command: &str) -> Result<(), IoError> {
        Ok(())
    }
}

/// Build the driver named in the static config.
pub fn make_driver(driver: &str) -> anyhow::Result<Box<dyn InputOutput>> {
    match driver {
        "null" => Ok(Box::new(NullInputOutput)),
        "simulated" => Ok(Box::new(SimulatedInputOutput::new())),
        other => anyhow::bail!("unknown io driver '{other}'"),
    }
}
