//! Simulated collaborators.
//!
//! These stand in for the hardware drivers when running the CLI without a rig
//! attached, and in tests. Noise is drawn from a seeded generator so a given
//! configuration always produces the same waveforms.

use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::acquire::rig::{AuxSensor, Digitizer, LaserDriver};
use crate::domain::{AuxReading, MS_PER_SECOND};
use crate::error::DecayError;

/// Waveform produced by [`SimulatedDigitizer`].
#[derive(Debug, Clone)]
pub struct SimulatedDecay {
    pub amplitude: f64,
    pub tau_ms: f64,
    pub offset: f64,
    pub noise_sigma: f64,
    /// Samples per second (Hz).
    pub sample_rate: f64,
    pub sample_count: usize,
    /// Time between arming and data-ready.
    pub capture_time: Duration,
    pub seed: u64,
}

impl Default for SimulatedDecay {
    fn default() -> Self {
        // 10 kHz for 120 ms, the flow-cell capture window.
        Self {
            amplitude: 1.0,
            tau_ms: 5.0,
            offset: 0.05,
            noise_sigma: 0.01,
            sample_rate: 1e4,
            sample_count: 1200,
            capture_time: Duration::from_millis(120),
            seed: 42,
        }
    }
}

pub struct SimulatedDigitizer {
    config: SimulatedDecay,
    rng: StdRng,
    noise: Normal<f64>,
    armed_at: Option<Instant>,
    open: bool,
}

impl SimulatedDigitizer {
    pub fn open(config: SimulatedDecay) -> Result<Self, DecayError> {
        if !(config.sample_rate.is_finite() && config.sample_rate > 0.0) {
            return Err(DecayError::InvalidConfig(format!(
                "simulated sample_rate must be > 0 (got {})",
                config.sample_rate
            )));
        }
        if config.sample_count == 0 {
            return Err(DecayError::InvalidConfig(
                "simulated sample_count must be > 0".to_string(),
            ));
        }
        if !(config.tau_ms.is_finite() && config.tau_ms > 0.0) {
            return Err(DecayError::InvalidConfig(format!(
                "simulated tau must be > 0 (got {})",
                config.tau_ms
            )));
        }
        let noise = Normal::new(0.0, config.noise_sigma.max(0.0))
            .map_err(|e| DecayError::InvalidConfig(format!("noise distribution error: {e}")))?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            noise,
            armed_at: None,
            open: true,
            config,
        })
    }

    fn ensure_open(&self) -> Result<(), DecayError> {
        if self.open {
            Ok(())
        } else {
            Err(DecayError::InstrumentFault("simulated digitizer is closed".to_string()))
        }
    }
}

impl Digitizer for SimulatedDigitizer {
    fn name(&self) -> &str {
        "simulated digitizer"
    }

    fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    fn arm(&mut self) -> Result<(), DecayError> {
        self.ensure_open()?;
        self.armed_at = Some(Instant::now());
        Ok(())
    }

    fn is_ready(&mut self) -> Result<bool, DecayError> {
        self.ensure_open()?;
        match self.armed_at {
            Some(at) => Ok(at.elapsed() >= self.config.capture_time),
            None => Err(DecayError::InstrumentFault("is_ready polled before arm".to_string())),
        }
    }

    fn read(&mut self) -> Result<Vec<f64>, DecayError> {
        if !self.is_ready()? {
            return Err(DecayError::InstrumentFault("read before data-ready".to_string()));
        }
        self.armed_at = None;

        let dt_ms = MS_PER_SECOND / self.config.sample_rate;
        let c = &self.config;
        Ok((0..c.sample_count)
            .map(|i| {
                let t = i as f64 * dt_ms;
                c.amplitude * (-t / c.tau_ms).exp() + c.offset + self.noise.sample(&mut self.rng)
            })
            .collect())
    }

    fn close(&mut self) -> Result<(), DecayError> {
        self.open = false;
        self.armed_at = None;
        Ok(())
    }
}

/// Ambient sensor that answers each request after `response_delay`.
pub struct SimulatedSensor {
    base: AuxReading,
    response_delay: Duration,
    requested_at: Option<Instant>,
    latest: Option<AuxReading>,
    requests: u64,
    rng: StdRng,
    open: bool,
}

impl SimulatedSensor {
    pub fn new(base: AuxReading, response_delay: Duration, seed: u64) -> Self {
        Self {
            base,
            response_delay,
            requested_at: None,
            latest: None,
            requests: 0,
            rng: StdRng::seed_from_u64(seed),
            open: true,
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    fn ensure_open(&self) -> Result<(), DecayError> {
        if self.open {
            Ok(())
        } else {
            Err(DecayError::SensorFault("simulated sensor is closed".to_string()))
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(
            AuxReading {
                temperature: 21.0,
                humidity: 45.0,
                aux1: 22.5,
                aux2: 22.7,
            },
            Duration::from_millis(50),
            7,
        )
    }
}

impl AuxSensor for SimulatedSensor {
    fn request_update(&mut self) -> Result<(), DecayError> {
        self.ensure_open()?;
        self.requests += 1;
        self.requested_at = Some(Instant::now());
        Ok(())
    }

    fn latest_reading(&mut self) -> Result<Option<AuxReading>, DecayError> {
        self.ensure_open()?;
        if let Some(at) = self.requested_at {
            if at.elapsed() >= self.response_delay {
                self.requested_at = None;
                let jitter = Normal::new(0.0, 0.05)
                    .map_err(|e| DecayError::SensorFault(format!("jitter distribution error: {e}")))?;
                let b = self.base;
                self.latest = Some(AuxReading {
                    temperature: b.temperature + jitter.sample(&mut self.rng),
                    humidity: b.humidity + jitter.sample(&mut self.rng),
                    aux1: b.aux1 + jitter.sample(&mut self.rng),
                    aux2: b.aux2 + jitter.sample(&mut self.rng),
                });
            }
        }
        Ok(self.latest)
    }

    fn close(&mut self) -> Result<(), DecayError> {
        self.open = false;
        Ok(())
    }
}

/// Laser driver with a fixed current and a linear current-to-power response.
#[derive(Debug, Clone)]
pub struct SimulatedLaser {
    current: f64,
    watts_per_amp: f64,
    on: bool,
}

impl SimulatedLaser {
    pub fn new(current: f64, watts_per_amp: f64) -> Self {
        Self {
            current,
            watts_per_amp,
            on: true,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

impl LaserDriver for SimulatedLaser {
    fn drive_current(&mut self) -> Result<f64, DecayError> {
        Ok(if self.on { self.current } else { 0.0 })
    }

    fn optical_power(&mut self) -> Result<f64, DecayError> {
        Ok(if self.on { self.current * self.watts_per_amp } else { 0.0 })
    }

    fn shutdown(&mut self) -> Result<(), DecayError> {
        self.on = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> SimulatedDecay {
        SimulatedDecay {
            sample_count: 50,
            capture_time: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn digitizer_requires_arm_before_read() {
        let mut d = SimulatedDigitizer::open(fast()).unwrap();
        assert!(d.read().is_err());
        d.arm().unwrap();
        assert!(d.is_ready().unwrap());
        assert_eq!(d.read().unwrap().len(), 50);
        // A read consumes the capture.
        assert!(d.is_ready().is_err());
    }

    #[test]
    fn same_seed_same_waveform() {
        let mut a = SimulatedDigitizer::open(fast()).unwrap();
        let mut b = SimulatedDigitizer::open(fast()).unwrap();
        a.arm().unwrap();
        b.arm().unwrap();
        assert_eq!(a.read().unwrap(), b.read().unwrap());
    }

    #[test]
    fn closed_digitizer_faults() {
        let mut d = SimulatedDigitizer::open(fast()).unwrap();
        d.close().unwrap();
        assert!(matches!(d.arm(), Err(DecayError::InstrumentFault(_))));
    }

    #[test]
    fn open_rejects_bad_config() {
        let cfg = SimulatedDecay {
            sample_count: 0,
            ..fast()
        };
        assert!(SimulatedDigitizer::open(cfg).is_err());
    }

    #[test]
    fn sensor_is_stale_until_response_arrives() {
        let mut s = SimulatedSensor::new(
            AuxReading {
                temperature: 20.0,
                humidity: 40.0,
                aux1: 1.0,
                aux2: 2.0,
            },
            Duration::from_secs(3600),
            1,
        );
        assert_eq!(s.latest_reading().unwrap(), None);
        s.request_update().unwrap();
        // Response not due yet; still nothing, and the call returned immediately.
        assert_eq!(s.latest_reading().unwrap(), None);
        assert_eq!(s.requests(), 1);
    }

    #[test]
    fn sensor_reports_after_delay() {
        let mut s = SimulatedSensor::new(
            AuxReading {
                temperature: 20.0,
                humidity: 40.0,
                aux1: 1.0,
                aux2: 2.0,
            },
            Duration::ZERO,
            1,
        );
        s.request_update().unwrap();
        let r = s.latest_reading().unwrap().unwrap();
        assert!((r.temperature - 20.0).abs() < 1.0);
        // Stale value is returned again without a new request.
        assert_eq!(s.latest_reading().unwrap(), Some(r));
    }

    #[test]
    fn laser_shutdown_zeroes_output() {
        let mut l = SimulatedLaser::new(0.5, 0.1);
        assert!((l.optical_power().unwrap() - 0.05).abs() < 1e-12);
        l.shutdown().unwrap();
        assert!(!l.is_on());
        assert_eq!(l.drive_current().unwrap(), 0.0);
    }
}
