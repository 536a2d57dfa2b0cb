//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - built by the acquisition loop as sweeps complete
//! - persisted as one container per sweep
//! - reloaded later and merged into a per-measurement table

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecayError;

/// Milliseconds per second; the time axis and lifetimes are reported in ms.
pub const MS_PER_SECOND: f64 = 1e3;

/// Latest auxiliary-sensor values (possibly stale).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuxReading {
    /// Ambient temperature (°C).
    pub temperature: f64,
    /// Relative humidity (%).
    pub humidity: f64,
    /// First auxiliary channel (inlet thermocouple on the flow cell rig).
    pub aux1: f64,
    /// Second auxiliary channel (outlet thermocouple on the flow cell rig).
    pub aux2: f64,
}

/// Last-known auxiliary values attached to each sweep.
///
/// Fields are `None` until a collaborator has reported them; a value is not
/// refreshed every sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepContext {
    pub drive_current: Option<f64>,
    pub optical_power: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub aux1: Option<f64>,
    pub aux2: Option<f64>,
    pub concentration: Option<f64>,
    pub medium: Option<String>,
    pub chip: Option<String>,
}

impl SweepContext {
    /// Overwrite the sensor-derived fields with a newer reading.
    pub fn merge_reading(&mut self, reading: &AuxReading) {
        self.temperature = Some(reading.temperature);
        self.humidity = Some(reading.humidity);
        self.aux1 = Some(reading.aux1);
        self.aux2 = Some(reading.aux2);
    }
}

/// One captured waveform plus metadata. Immutable once persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRecord {
    pub measurement_id: String,
    pub sweep_index: u64,
    pub captured_at: DateTime<Utc>,
    /// Samples per second (Hz).
    pub sample_rate: f64,
    pub samples: Vec<f64>,
    pub context: SweepContext,
}

impl SweepRecord {
    pub fn new(
        measurement_id: impl Into<String>,
        sweep_index: u64,
        captured_at: DateTime<Utc>,
        sample_rate: f64,
        samples: Vec<f64>,
        context: SweepContext,
    ) -> Result<Self, DecayError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DecayError::InvalidConfig(format!(
                "sample_rate must be finite and > 0 (got {sample_rate})"
            )));
        }
        if samples.is_empty() {
            return Err(DecayError::InstrumentFault(
                "instrument returned an empty waveform".to_string(),
            ));
        }
        Ok(Self {
            measurement_id: measurement_id.into(),
            sweep_index,
            captured_at,
            sample_rate,
            samples,
            context,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Time axis in milliseconds, `t_i = i / sample_rate · 1000`.
    pub fn time_axis_ms(&self) -> Vec<f64> {
        time_axis_ms(self.sample_rate, self.sample_count())
    }
}

/// Build a time axis (ms) from a sample rate (Hz) and a sample count.
pub fn time_axis_ms(sample_rate: f64, sample_count: usize) -> Vec<f64> {
    let dt = MS_PER_SECOND / sample_rate;
    (0..sample_count).map(|i| i as f64 * dt).collect()
}

/// One-sigma parameter uncertainties from the fit covariance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamErrors {
    pub amplitude: f64,
    pub tau: f64,
    pub offset: f64,
}

/// Decay-fit output for one sweep.
///
/// When `fit_ok` is false, `amplitude`, `tau` and `offset` are all NaN together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitResult {
    pub amplitude: f64,
    pub tau: f64,
    pub offset: f64,
    pub fit_ok: bool,
    pub errors: Option<ParamErrors>,
    pub rmse: f64,
    pub iterations: usize,
    /// Why the fit failed (degenerate signal or non-convergence).
    pub failure: Option<String>,
}

impl FitResult {
    pub fn failed(iterations: usize, reason: impl Into<String>) -> Self {
        Self {
            amplitude: f64::NAN,
            tau: f64::NAN,
            offset: f64::NAN,
            fit_ok: false,
            errors: None,
            rmse: f64::NAN,
            iterations,
            failure: Some(reason.into()),
        }
    }
}

/// A fit joined with the metadata of the sweep it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    /// Dense 0-based position after sorting.
    pub row: usize,
    pub captured_at: DateTime<Utc>,
    pub measurement_id: String,
    pub sweep_index: u64,
    pub sample_rate: f64,
    pub sample_count: usize,
    pub context: SweepContext,
    pub fit: FitResult,
    /// File name of the originating sweep container.
    pub source: String,
}

/// Merged, time-sorted fit results for one measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateTable {
    pub measurement_id: String,
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn fit_failures(&self) -> usize {
        self.rows.iter().filter(|r| !r.fit.fit_ok).count()
    }
}

/// A sweep container that could not be turned into a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub source: String,
    pub message: String,
}

/// How long an acquisition run lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepBound {
    /// Run exactly N sweeps.
    Count(u64),
    /// Start new sweeps until `now + duration` has passed.
    Duration(Duration),
}

/// How the folder aggregator schedules per-file work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Sequential,
    /// Fan out one task per file; `None` uses the global rayon pool.
    Parallel { workers: Option<usize> },
}

/// Acquisition loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Arming,
    Capturing,
    Persisting,
    Done,
}

/// Why an acquisition run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    CountReached,
    DeadlineReached,
    Cancelled,
}

/// Optional conditioning of `(t, y)` before fitting.
///
/// With all fields at zero the trace is passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Preprocess {
    /// Subtracted from every time value so the decay starts at t = 0 (ms).
    pub pump_delay_ms: f64,
    /// Drop samples earlier than `t0 + reject_start_ms`.
    pub reject_start_ms: f64,
    /// Drop samples later than `t_last - reject_end_ms`.
    pub reject_end_ms: f64,
}

impl Preprocess {
    pub fn is_identity(&self) -> bool {
        self.pump_delay_ms == 0.0 && self.reject_start_ms == 0.0 && self.reject_end_ms == 0.0
    }

    pub fn validate(&self) -> Result<(), DecayError> {
        for (name, v) in [
            ("pump_delay_ms", self.pump_delay_ms),
            ("reject_start_ms", self.reject_start_ms),
            ("reject_end_ms", self.reject_end_ms),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(DecayError::InvalidConfig(format!(
                    "{name} must be finite and >= 0 (got {v})"
                )));
            }
        }
        Ok(())
    }
}

/// Check that a measurement id is usable as a single path component.
pub fn validate_measurement_id(id: &str) -> Result<(), DecayError> {
    if id.trim().is_empty() {
        return Err(DecayError::InvalidConfig("measurement id is empty".to_string()));
    }
    if id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(DecayError::InvalidConfig(format!(
            "measurement id '{id}' must be a single path component"
        )));
    }
    Ok(())
}
