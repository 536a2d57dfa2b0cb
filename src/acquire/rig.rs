//! Instrument collaborators and the rig that owns them.
//!
//! Drivers for the physical hardware live outside this crate; they plug in by
//! implementing the traits below. Opening a device is driver-specific (each
//! driver takes its own sampling/port configuration) and happens before the
//! handle is handed to a [`Rig`].

use tracing::{debug, warn};

use crate::domain::{AuxReading, SweepContext};
use crate::error::DecayError;

/// Waveform digitizer (oscilloscope) in block-capture mode.
pub trait Digitizer {
    fn name(&self) -> &str;

    /// Samples per second of the configured capture.
    fn sample_rate(&self) -> f64;

    /// Start a triggered block capture.
    fn arm(&mut self) -> Result<(), DecayError>;

    /// Non-blocking check whether the armed capture has completed.
    fn is_ready(&mut self) -> Result<bool, DecayError>;

    /// Fetch the captured waveform.
    fn read(&mut self) -> Result<Vec<f64>, DecayError>;

    fn close(&mut self) -> Result<(), DecayError>;
}

/// Slow ambient sensor polled with a request/response pair.
pub trait AuxSensor {
    /// Ask for a new reading. Must not wait for the response.
    fn request_update(&mut self) -> Result<(), DecayError>;

    /// Most recently received values, `None` until the first response arrives.
    fn latest_reading(&mut self) -> Result<Option<AuxReading>, DecayError>;

    fn close(&mut self) -> Result<(), DecayError>;
}

/// Laser-diode driver supplying the excitation.
pub trait LaserDriver {
    /// Drive current setpoint (A).
    fn drive_current(&mut self) -> Result<f64, DecayError>;

    /// Optical power from the driver's internal photodiode (W).
    fn optical_power(&mut self) -> Result<f64, DecayError>;

    /// Turn the diode off.
    fn shutdown(&mut self) -> Result<(), DecayError>;
}

/// Independently owned handles to each collaborator of one acquisition run.
///
/// The rig exposes only what the acquisition loop needs. It is closed exactly
/// once, either explicitly or on drop.
pub struct Rig {
    digitizer: Box<dyn Digitizer>,
    sensor: Option<Box<dyn AuxSensor>>,
    laser: Option<Box<dyn LaserDriver>>,
    closed: bool,
}

impl Rig {
    pub fn new(digitizer: Box<dyn Digitizer>) -> Self {
        Self {
            digitizer,
            sensor: None,
            laser: None,
            closed: false,
        }
    }

    pub fn with_sensor(mut self, sensor: Box<dyn AuxSensor>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn with_laser(mut self, laser: Box<dyn LaserDriver>) -> Self {
        self.laser = Some(laser);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn sample_rate(&self) -> f64 {
        self.digitizer.sample_rate()
    }

    pub fn digitizer_name(&self) -> &str {
        self.digitizer.name()
    }

    pub(crate) fn arm(&mut self) -> Result<(), DecayError> {
        self.ensure_open()?;
        self.digitizer.arm()
    }

    pub(crate) fn is_ready(&mut self) -> Result<bool, DecayError> {
        self.digitizer.is_ready()
    }

    pub(crate) fn read(&mut self) -> Result<Vec<f64>, DecayError> {
        self.digitizer.read()
    }

    /// Fire a sensor request without waiting for the response.
    pub(crate) fn request_aux_update(&mut self) -> Result<(), DecayError> {
        match self.sensor.as_mut() {
            Some(sensor) => sensor.request_update(),
            None => Ok(()),
        }
    }

    /// Merge whatever the sensor last received into `context`.
    pub(crate) fn merge_aux_reading(&mut self, context: &mut SweepContext) -> Result<(), DecayError> {
        if let Some(sensor) = self.sensor.as_mut() {
            if let Some(reading) = sensor.latest_reading()? {
                context.merge_reading(&reading);
            }
        }
        Ok(())
    }

    pub(crate) fn merge_laser_state(&mut self, context: &mut SweepContext) -> Result<(), DecayError> {
        if let Some(laser) = self.laser.as_mut() {
            context.drive_current = Some(laser.drive_current()?);
            context.optical_power = Some(laser.optical_power()?);
        }
        Ok(())
    }

    /// Close every collaborator, attempting all of them even if one fails.
    pub fn close(&mut self) -> Result<(), DecayError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut errors = Vec::new();
        if let Err(e) = self.digitizer.close() {
            errors.push(e);
        }
        if let Some(sensor) = self.sensor.as_mut() {
            if let Err(e) = sensor.close() {
                errors.push(e);
            }
        }
        if let Some(laser) = self.laser.as_mut() {
            if let Err(e) = laser.shutdown() {
                errors.push(e);
            }
        }
        debug!(digitizer = self.digitizer.name(), failures = errors.len(), "rig closed");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DecayError::ShutdownFailed(errors))
        }
    }

    fn ensure_open(&self) -> Result<(), DecayError> {
        if self.closed {
            return Err(DecayError::InstrumentFault(format!(
                "{} is already closed",
                self.digitizer.name()
            )));
        }
        Ok(())
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "rig close on drop failed");
        }
    }
}

impl std::fmt::Debug for Rig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rig")
            .field("digitizer", &self.digitizer.name())
            .field("sensor", &self.sensor.is_some())
            .field("laser", &self.laser.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}
