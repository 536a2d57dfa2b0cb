//! Mono-exponential decay model.
//!
//! `f(t; A, τ, c) = A·exp(-t/τ) + c`
//!
//! The fitter relies on three primitive operations:
//! - predict y(t) given parameters (for residuals)
//! - the partial derivatives of f at t (one Jacobian row)
//! - an initial parameter guess from a raw trace
//!
//! The guess is a pure function of `(t, y)` so fits are repeatable.

use serde::{Deserialize, Serialize};

use crate::error::DecayError;

/// Number of free parameters (A, τ, c).
pub const PARAM_COUNT: usize = 3;

/// Normalized level at which the decay time is read off (1/e).
const DECAY_THRESHOLD: f64 = 1.0 / std::f64::consts::E;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayParams {
    pub amplitude: f64,
    pub tau: f64,
    pub offset: f64,
}

impl DecayParams {
    pub fn new(amplitude: f64, tau: f64, offset: f64) -> Self {
        Self {
            amplitude,
            tau,
            offset,
        }
    }

    pub fn to_array(self) -> [f64; PARAM_COUNT] {
        [self.amplitude, self.tau, self.offset]
    }

    pub fn from_array(v: [f64; PARAM_COUNT]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn is_finite(&self) -> bool {
        self.amplitude.is_finite() && self.tau.is_finite() && self.offset.is_finite()
    }
}

/// Predict `y(t)`.
pub fn predict(t: f64, p: &DecayParams) -> f64 {
    p.amplitude * (-t / p.tau).exp() + p.offset
}

/// Fill `∂f/∂(A, τ, c)` at `t`.
pub fn fill_jacobian_row(t: f64, p: &DecayParams, out: &mut [f64; PARAM_COUNT]) {
    let e = (-t / p.tau).exp();
    out[0] = e;
    out[1] = p.amplitude * t * e / (p.tau * p.tau);
    out[2] = 1.0;
}

/// Initial guess for a decay trace.
///
/// - `A₀ = max(y) − min(y)`
/// - `c₀ = min(y)`
/// - `τ₀ = t[k]` where `k` is the first index (ascending, starting at the peak)
///   whose normalized value `(y − min) / (max − min)` is `<= 1/e`
///
/// Samples before the first maximum are ignored by the scan, so a pre-trigger
/// baseline below `1/e` does not produce a zero or negative `τ₀`.
///
/// A flat, non-finite or non-decaying trace is reported as `DegenerateSignal`.
pub fn initial_guess(t: &[f64], y: &[f64]) -> Result<DecayParams, DecayError> {
    if t.len() != y.len() || y.is_empty() {
        return Err(DecayError::InsufficientData {
            t_len: t.len(),
            y_len: y.len(),
        });
    }
    if t.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(DecayError::DegenerateSignal(
            "trace contains non-finite values".to_string(),
        ));
    }

    let mut y_min = y[0];
    let mut y_max = y[0];
    let mut peak = 0usize;
    for (i, &v) in y.iter().enumerate() {
        if v < y_min {
            y_min = v;
        }
        if v > y_max {
            y_max = v;
            peak = i;
        }
    }

    let span = y_max - y_min;
    if span <= 0.0 {
        return Err(DecayError::DegenerateSignal(format!(
            "constant trace (y = {y_min}), cannot normalize"
        )));
    }

    let crossing = (peak..y.len()).find(|&i| (y[i] - y_min) / span <= DECAY_THRESHOLD);
    let Some(k) = crossing else {
        return Err(DecayError::DegenerateSignal(
            "trace never falls below 1/e of its span after the peak".to_string(),
        ));
    };

    let tau = t[k];
    if tau <= 0.0 {
        return Err(DecayError::DegenerateSignal(format!(
            "1/e crossing at non-positive time t={tau}"
        )));
    }

    Ok(DecayParams::new(span, tau, y_min))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_on_reference_trace() {
        let t = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [10.0, 6.7, 4.5, 3.3, 2.6, 2.2];
        let g = initial_guess(&t, &y).unwrap();
        assert!((g.amplitude - 7.8).abs() < 1e-12);
        assert!((g.offset - 2.2).abs() < 1e-12);
        assert_eq!(g.tau, 2.0);
    }

    #[test]
    fn guess_takes_first_crossing_not_nearest() {
        // Normalized: [1, 0.5, 0.1, 0.367, 0]. Index 3 is nearest to 1/e,
        // index 2 is the first at or below it.
        let t = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y = [1.0, 0.5, 0.1, 0.367, 0.0];
        let g = initial_guess(&t, &y).unwrap();
        assert_eq!(g.tau, 2.0);
    }

    #[test]
    fn guess_ignores_baseline_before_peak() {
        // Pre-trigger baseline sits below 1/e; the scan only starts at the peak.
        let t = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [0.05, 0.0, 1.0, 0.6, 0.3, 0.1];
        let g = initial_guess(&t, &y).unwrap();
        assert_eq!(g.tau, 4.0);
        assert_eq!(g.offset, 0.0);
    }

    #[test]
    fn flat_trace_is_degenerate() {
        let t = [0.0, 1.0, 2.0, 3.0];
        let y = [4.2; 4];
        let err = initial_guess(&t, &y).unwrap_err();
        assert!(matches!(err, DecayError::DegenerateSignal(_)));
    }

    #[test]
    fn nan_sample_is_degenerate() {
        let t = [0.0, 1.0, 2.0, 3.0];
        let y = [4.0, f64::NAN, 1.0, 0.5];
        assert!(matches!(
            initial_guess(&t, &y),
            Err(DecayError::DegenerateSignal(_))
        ));
    }

    #[test]
    fn rising_trace_is_degenerate() {
        let t = [0.0, 1.0, 2.0, 3.0];
        let y = [0.0, 1.0, 2.0, 3.0];
        assert!(matches!(
            initial_guess(&t, &y),
            Err(DecayError::DegenerateSignal(_))
        ));
    }

    #[test]
    fn jacobian_matches_finite_difference() {
        let p = DecayParams::new(3.0, 1.5, 0.5);
        let t = 0.7;
        let mut row = [0.0; PARAM_COUNT];
        fill_jacobian_row(t, &p, &mut row);

        let h = 1e-6;
        let base = p.to_array();
        for k in 0..PARAM_COUNT {
            let mut hi = base;
            let mut lo = base;
            hi[k] += h;
            lo[k] -= h;
            let fd = (predict(t, &DecayParams::from_array(hi)) - predict(t, &DecayParams::from_array(lo)))
                / (2.0 * h);
            assert!((fd - row[k]).abs() < 1e-6, "param {k}: fd={fd}, analytic={}", row[k]);
        }
    }
}
