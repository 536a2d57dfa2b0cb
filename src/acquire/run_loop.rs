//! The acquisition loop.
//!
//! One iteration, strictly in order:
//!
//! 1. arm the digitizer
//! 2. wait for data-ready (the only blocking wait, re-checked every `poll_interval`)
//! 3. read the waveform
//! 4. timestamp the sweep
//! 5. build and persist a `SweepRecord`
//!
//! Auxiliary refreshes are spread across iterations: once `dwell` has passed
//! since the last refresh we merge whatever the sensor last received and fire
//! the next request. Nothing in that path waits on the sensor.
//!
//! The loop-continuation check (count, deadline, stop signal) runs before each
//! new sweep, so a sweep in progress is always completed.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use crate::acquire::rig::Rig;
use crate::domain::{
    LoopState, StopReason, SweepBound, SweepContext, SweepRecord, validate_measurement_id,
};
use crate::error::DecayError;
use crate::io::SweepStore;

/// Cooperative stop request shared with whoever may interrupt the run.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A full acquisition run's configuration.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub measurement_id: String,
    pub bound: SweepBound,
    /// Minimum time between auxiliary refreshes.
    pub dwell: Duration,
    /// Re-check interval while waiting for data-ready.
    pub poll_interval: Duration,
    /// Give up on a capture that never reports data-ready.
    pub ready_timeout: Duration,
    /// Static context fields (chip, medium, concentration, ...).
    pub context: SweepContext,
}

impl AcquisitionConfig {
    pub fn new(measurement_id: impl Into<String>, bound: SweepBound) -> Self {
        Self {
            measurement_id: measurement_id.into(),
            bound,
            dwell: Duration::from_secs(3),
            poll_interval: Duration::from_millis(1),
            ready_timeout: Duration::from_secs(5),
            context: SweepContext::default(),
        }
    }

    pub fn validate(&self) -> Result<(), DecayError> {
        validate_measurement_id(&self.measurement_id)?;
        if self.poll_interval.is_zero() {
            return Err(DecayError::InvalidConfig(
                "poll_interval must be > 0 (no busy-spinning)".to_string(),
            ));
        }
        if self.ready_timeout < self.poll_interval {
            return Err(DecayError::InvalidConfig(format!(
                "ready_timeout ({:?}) must be >= poll_interval ({:?})",
                self.ready_timeout, self.poll_interval
            )));
        }
        if let SweepBound::Duration(d) = self.bound {
            if d.is_zero() {
                return Err(DecayError::InvalidConfig(
                    "duration bound must be > 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// A sweep whose container could not be written.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub sweep_index: u64,
    pub message: String,
}

/// Outcome of one acquisition run.
#[derive(Debug, Clone)]
pub struct AcquisitionSummary {
    pub measurement_id: String,
    pub stop_reason: StopReason,
    pub sweeps_captured: u64,
    pub persisted: Vec<PathBuf>,
    pub write_failures: Vec<WriteFailure>,
    pub elapsed: Duration,
    /// Element-wise sum of all captured waveforms.
    pub accumulated: Vec<f64>,
}

pub struct AcquisitionLoop<'a, S: SweepStore + ?Sized> {
    config: AcquisitionConfig,
    rig: Rig,
    store: &'a S,
    stop: StopSignal,
    state: LoopState,
}

impl<'a, S: SweepStore + ?Sized> AcquisitionLoop<'a, S> {
    pub fn new(config: AcquisitionConfig, rig: Rig, store: &'a S) -> Result<Self, DecayError> {
        config.validate()?;
        Ok(Self {
            config,
            rig,
            store,
            stop: StopSignal::new(),
            state: LoopState::Idle,
        })
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Handle for requesting a stop from another thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    /// Run until the bound is reached or a stop is requested.
    ///
    /// The rig is closed before returning on every path. A collaborator fault
    /// aborts the run; a failed write of one sweep does not.
    pub fn run(&mut self) -> Result<AcquisitionSummary, DecayError> {
        if self.state == LoopState::Done {
            return Err(DecayError::InvalidConfig(
                "acquisition loop already finished".to_string(),
            ));
        }

        info!(
            measurement_id = %self.config.measurement_id,
            bound = ?self.config.bound,
            digitizer = self.rig.digitizer_name(),
            "acquisition started"
        );
        let started = Instant::now();
        let result = self.run_sweeps(started);
        let closed = self.rig.close();
        self.transition(LoopState::Done);

        match (result, closed) {
            (Ok(mut summary), Ok(())) => {
                summary.elapsed = started.elapsed();
                info!(
                    sweeps = summary.sweeps_captured,
                    persisted = summary.persisted.len(),
                    write_failures = summary.write_failures.len(),
                    reason = ?summary.stop_reason,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "acquisition finished"
                );
                Ok(summary)
            }
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                warn!(%close_err, "rig close failed after acquisition error");
                Err(err)
            }
        }
    }

    fn run_sweeps(&mut self, started: Instant) -> Result<AcquisitionSummary, DecayError> {
        let deadline = match self.config.bound {
            SweepBound::Duration(d) => Some(started + d),
            SweepBound::Count(_) => None,
        };

        let mut context = self.config.context.clone();
        self.rig.merge_laser_state(&mut context)?;
        // Prime the sensor so the first scheduled refresh has a response waiting.
        self.rig.request_aux_update()?;
        let mut last_refresh = Instant::now();

        let mut sweep_index = 0u64;
        let mut last_captured: Option<DateTime<Utc>> = None;
        let mut persisted = Vec::new();
        let mut write_failures = Vec::new();
        let mut accumulated: Vec<f64> = Vec::new();

        let stop_reason = loop {
            if let Some(reason) = self.should_stop(sweep_index, deadline) {
                break reason;
            }

            if last_refresh.elapsed() > self.config.dwell {
                self.rig.merge_aux_reading(&mut context)?;
                self.rig.merge_laser_state(&mut context)?;
                self.rig.request_aux_update()?;
                last_refresh = Instant::now();
                trace!(sweep = sweep_index, "auxiliary context refreshed");
            }

            let samples = self.capture()?;
            let captured_at = strictly_after(Utc::now(), last_captured);
            last_captured = Some(captured_at);
            accumulate(&mut accumulated, &samples);

            self.transition(LoopState::Persisting);
            let record = SweepRecord::new(
                self.config.measurement_id.clone(),
                sweep_index,
                captured_at,
                self.rig.sample_rate(),
                samples,
                context.clone(),
            )?;
            match self.store.persist(&record) {
                Ok(path) => {
                    debug!(sweep = sweep_index, path = %path.display(), "sweep captured");
                    persisted.push(path);
                }
                Err(err) => {
                    warn!(sweep = sweep_index, %err, "failed to persist sweep; continuing");
                    write_failures.push(WriteFailure {
                        sweep_index,
                        message: err.to_string(),
                    });
                }
            }

            sweep_index += 1;
            self.transition(LoopState::Idle);
        };

        Ok(AcquisitionSummary {
            measurement_id: self.config.measurement_id.clone(),
            stop_reason,
            sweeps_captured: sweep_index,
            persisted,
            write_failures,
            elapsed: started.elapsed(),
            accumulated,
        })
    }

    fn should_stop(&self, sweep_index: u64, deadline: Option<Instant>) -> Option<StopReason> {
        if self.stop.is_stopped() {
            return Some(StopReason::Cancelled);
        }
        if let SweepBound::Count(n) = self.config.bound {
            if sweep_index >= n {
                return Some(StopReason::CountReached);
            }
        }
        match deadline {
            Some(d) if Instant::now() >= d => Some(StopReason::DeadlineReached),
            _ => None,
        }
    }

    fn capture(&mut self) -> Result<Vec<f64>, DecayError> {
        self.transition(LoopState::Arming);
        self.rig.arm()?;

        self.transition(LoopState::Capturing);
        let waiting = Instant::now();
        while !self.rig.is_ready()? {
            if waiting.elapsed() >= self.config.ready_timeout {
                return Err(DecayError::InstrumentFault(format!(
                    "no data-ready within {:?}",
                    self.config.ready_timeout
                )));
            }
            thread::sleep(self.config.poll_interval);
        }
        self.rig.read()
    }

    fn transition(&mut self, next: LoopState) {
        trace!(from = ?self.state, to = ?next, "loop state");
        self.state = next;
    }
}

/// `now`, bumped by 1 µs if needed so timestamps strictly increase.
fn strictly_after(now: DateTime<Utc>, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
        _ => now,
    }
}

fn accumulate(total: &mut Vec<f64>, samples: &[f64]) {
    if total.is_empty() {
        total.extend_from_slice(samples);
    } else if total.len() == samples.len() {
        for (acc, v) in total.iter_mut().zip(samples) {
            *acc += v;
        }
    } else {
        warn!(
            expected = total.len(),
            got = samples.len(),
            "waveform length changed; not accumulated"
        );
    }
}
