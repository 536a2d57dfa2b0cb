//! Linear least squares solver.
//!
//! Each damped Gauss-Newton step of the decay fit is a small linear least squares
//! problem of the form:
//!
//! ```text
//! minimize |b - A δ|²
//! ```
//!
//! where `A` stacks the Jacobian on top of the damping rows, so it is always
//! tall (n + 3 rows, 3 columns).
//!
//! We solve via SVD so near-singular Jacobians (e.g. τ far outside the sampled
//! window, where ∂f/∂τ vanishes) degrade gracefully instead of panicking.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return None;
    }
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}
