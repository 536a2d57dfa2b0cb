//! Levenberg-Marquardt fit of a single decay trace.
//!
//! Given:
//! - time values `t_i` (ms)
//! - observed amplitudes `y_i`
//!
//! we start from the model's initial guess and iterate damped Gauss-Newton steps
//! until one of the convergence tests passes or the iteration budget runs out.
//!
//! Each step solves the augmented least squares system
//!
//! ```text
//! [ J          ]     [ r ]
//! [ sqrt(λ D)  ] δ ≈ [ 0 ]
//! ```
//!
//! with `D = diag(JᵀJ)` (Marquardt scaling). Everything is deterministic:
//! no randomness in the guess, the damping schedule, or the tolerances.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::domain::{FitResult, ParamErrors};
use crate::error::DecayError;
use crate::math::solve_least_squares;
use crate::models::{DecayParams, PARAM_COUNT, fill_jacobian_row, initial_guess, predict};

const DAMPING_MIN: f64 = 1e-12;
const DAMPING_MAX: f64 = 1e16;
const DAMPING_FACTOR: f64 = 10.0;

/// Floor for the Marquardt scale of a parameter whose Jacobian column vanishes.
const SCALE_FLOOR: f64 = 1e-12;

/// SSE below `EXACT_FIT_REL * Σy²` counts as an exact fit.
const EXACT_FIT_REL: f64 = 1e-24;

/// Stationarity test applied once the damping saturates.
const STALL_GTOL: f64 = 1e-5;

/// Optimizer settings.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Maximum number of Jacobian evaluations.
    pub max_iterations: usize,
    /// Starting damping factor λ.
    pub initial_damping: f64,
    /// Stop when an accepted step reduces the SSE by less than this fraction.
    pub ftol: f64,
    /// Stop when every parameter moves by less than this relative amount.
    pub xtol: f64,
    /// Stop when the residual is this close to orthogonal to every Jacobian column.
    pub gtol: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            initial_damping: 1e-3,
            ftol: 1e-12,
            xtol: 1e-10,
            gtol: 1e-10,
        }
    }
}

impl FitOptions {
    pub fn validate(&self) -> Result<(), DecayError> {
        if self.max_iterations == 0 {
            return Err(DecayError::InvalidConfig(
                "max_iterations must be >= 1".to_string(),
            ));
        }
        for (name, v) in [
            ("initial_damping", self.initial_damping),
            ("ftol", self.ftol),
            ("xtol", self.xtol),
            ("gtol", self.gtol),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(DecayError::InvalidConfig(format!(
                    "{name} must be finite and > 0 (got {v})"
                )));
            }
        }
        Ok(())
    }
}

/// Bounded-failure decay fitter.
///
/// Only precondition violations (`InsufficientData`) are returned as errors.
/// A degenerate trace or a fit that does not converge yields
/// `FitResult { fit_ok: false, .. }` with NaN parameters.
#[derive(Debug, Clone, Default)]
pub struct DecayFitter {
    options: FitOptions,
}

impl DecayFitter {
    pub fn new(options: FitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    pub fn fit(&self, t: &[f64], y: &[f64]) -> Result<FitResult, DecayError> {
        if t.len() != y.len() || t.len() <= PARAM_COUNT {
            return Err(DecayError::InsufficientData {
                t_len: t.len(),
                y_len: y.len(),
            });
        }

        let start = match initial_guess(t, y) {
            Ok(p) => p,
            Err(err) => {
                debug!(%err, "initial guess rejected");
                return Ok(FitResult::failed(0, err.to_string()));
            }
        };

        match levenberg_marquardt(t, y, start, &self.options) {
            Ok(solution) => Ok(finish(t, solution)),
            Err(stall) => {
                let err = DecayError::FitNonConvergence(stall.reason);
                debug!(%err, iterations = stall.iterations, "decay fit failed");
                Ok(FitResult::failed(stall.iterations, err.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Solution {
    params: DecayParams,
    sse: f64,
    iterations: usize,
}

#[derive(Debug, Clone)]
struct Stall {
    iterations: usize,
    reason: String,
}

fn levenberg_marquardt(
    t: &[f64],
    y: &[f64],
    start: DecayParams,
    opts: &FitOptions,
) -> Result<Solution, Stall> {
    let y_scale: f64 = y.iter().map(|v| v * v).sum();
    let exact_sse = EXACT_FIT_REL * y_scale.max(f64::MIN_POSITIVE);

    let mut p = start;
    let mut r = residuals(t, y, &p);
    let mut sse = r.norm_squared();
    if !sse.is_finite() {
        return Err(Stall {
            iterations: 0,
            reason: "non-finite residuals at the initial guess".to_string(),
        });
    }
    let mut damping = opts.initial_damping;

    for iteration in 1..=opts.max_iterations {
        let done = |params, sse, iterations| Solution {
            params,
            sse,
            iterations,
        };
        if sse <= exact_sse {
            return Ok(done(p, sse, iteration - 1));
        }

        let j = jacobian(t, &p);
        if max_gradient_cosine(&j, &r) <= opts.gtol {
            return Ok(done(p, sse, iteration - 1));
        }

        let scale: Vec<f64> = (0..PARAM_COUNT)
            .map(|k| j.column(k).norm_squared().max(SCALE_FLOOR))
            .collect();

        loop {
            if let Some(step) = damped_step(&j, &r, &scale, damping) {
                let base = p.to_array();
                let candidate = DecayParams::from_array([
                    base[0] + step[0],
                    base[1] + step[1],
                    base[2] + step[2],
                ]);

                if candidate.is_finite() && candidate.tau > 0.0 {
                    let r_new = residuals(t, y, &candidate);
                    let sse_new = r_new.norm_squared();
                    if sse_new.is_finite() && sse_new < sse {
                        let reduction = (sse - sse_new) / sse;
                        let rel_step = (0..PARAM_COUNT)
                            .map(|k| step[k].abs() / (base[k].abs() + opts.xtol))
                            .fold(0.0, f64::max);

                        p = candidate;
                        r = r_new;
                        sse = sse_new;
                        damping = (damping / DAMPING_FACTOR).max(DAMPING_MIN);

                        if reduction <= opts.ftol || rel_step <= opts.xtol {
                            return Ok(done(p, sse, iteration));
                        }
                        break;
                    }
                }
            }

            damping *= DAMPING_FACTOR;
            if damping > DAMPING_MAX {
                // No step reduces the SSE; accept only if we are already stationary.
                if max_gradient_cosine(&j, &r) <= STALL_GTOL {
                    return Ok(done(p, sse, iteration));
                }
                return Err(Stall {
                    iterations: iteration,
                    reason: format!(
                        "damping exceeded {DAMPING_MAX:e} without reducing the residual (sse={sse:e})"
                    ),
                });
            }
        }
    }

    Err(Stall {
        iterations: opts.max_iterations,
        reason: format!("iteration budget of {} exhausted", opts.max_iterations),
    })
}

fn damped_step(
    j: &DMatrix<f64>,
    r: &DVector<f64>,
    scale: &[f64],
    damping: f64,
) -> Option<DVector<f64>> {
    let n = j.nrows();
    let mut a = DMatrix::<f64>::zeros(n + PARAM_COUNT, PARAM_COUNT);
    a.view_mut((0, 0), (n, PARAM_COUNT)).copy_from(j);
    let mut b = DVector::<f64>::zeros(n + PARAM_COUNT);
    b.rows_mut(0, n).copy_from(r);
    for k in 0..PARAM_COUNT {
        a[(n + k, k)] = (damping * scale[k]).sqrt();
    }
    solve_least_squares(&a, &b)
}

fn residuals(t: &[f64], y: &[f64], p: &DecayParams) -> DVector<f64> {
    DVector::from_iterator(
        t.len(),
        t.iter().zip(y.iter()).map(|(&ti, &yi)| yi - predict(ti, p)),
    )
}

fn jacobian(t: &[f64], p: &DecayParams) -> DMatrix<f64> {
    let mut j = DMatrix::<f64>::zeros(t.len(), PARAM_COUNT);
    let mut row = [0.0; PARAM_COUNT];
    for (i, &ti) in t.iter().enumerate() {
        fill_jacobian_row(ti, p, &mut row);
        for k in 0..PARAM_COUNT {
            j[(i, k)] = row[k];
        }
    }
    j
}

/// Largest |cos| of the angle between the residual and a Jacobian column.
fn max_gradient_cosine(j: &DMatrix<f64>, r: &DVector<f64>) -> f64 {
    let r_norm = r.norm();
    if r_norm == 0.0 {
        return 0.0;
    }
    let mut worst = 0.0_f64;
    for k in 0..j.ncols() {
        let col = j.column(k);
        let col_norm = col.norm();
        if col_norm == 0.0 {
            continue;
        }
        worst = worst.max((col.dot(r) / (col_norm * r_norm)).abs());
    }
    worst
}

fn finish(t: &[f64], solution: Solution) -> FitResult {
    let p = solution.params;
    FitResult {
        amplitude: p.amplitude,
        tau: p.tau,
        offset: p.offset,
        fit_ok: true,
        errors: parameter_errors(t, &p, solution.sse),
        rmse: (solution.sse / t.len() as f64).sqrt(),
        iterations: solution.iterations,
        failure: None,
    }
}

/// One-sigma errors from `s² (JᵀJ)⁻¹` with `s² = SSE / (n - 3)`.
fn parameter_errors(t: &[f64], p: &DecayParams, sse: f64) -> Option<ParamErrors> {
    let j = jacobian(t, p);
    let dof = t.len().saturating_sub(PARAM_COUNT).max(1);
    let s2 = sse / dof as f64;
    let cov = (j.transpose() * &j).try_inverse()?;
    let errors = ParamErrors {
        amplitude: (cov[(0, 0)] * s2).sqrt(),
        tau: (cov[(1, 1)] * s2).sqrt(),
        offset: (cov[(2, 2)] * s2).sqrt(),
    };
    if errors.amplitude.is_finite() && errors.tau.is_finite() && errors.offset.is_finite() {
        Some(errors)
    } else {
        None
    }
}
