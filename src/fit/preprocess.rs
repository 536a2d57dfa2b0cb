//! Optional conditioning of a trace before fitting.
//!
//! Some rigs fire a pump pulse at the start of every sweep; the decay only
//! starts once the pump is off. Shifting the time axis and dropping the pump
//! window keeps that out of the fitted model.

use crate::domain::Preprocess;

/// Apply the time shift and the rejection window to `(t, y)`.
///
/// Samples are kept when `t0 + reject_start <= t <= t_last - reject_end`,
/// where `t0`/`t_last` are the first/last shifted times.
pub fn condition(t: &[f64], y: &[f64], pre: &Preprocess) -> (Vec<f64>, Vec<f64>) {
    if pre.is_identity() {
        return (t.to_vec(), y.to_vec());
    }

    let shifted: Vec<f64> = t.iter().map(|&ti| ti - pre.pump_delay_ms).collect();
    let (Some(&first), Some(&last)) = (shifted.first(), shifted.last()) else {
        return (Vec::new(), Vec::new());
    };
    let lo = first + pre.reject_start_ms;
    let hi = last - pre.reject_end_ms;

    shifted
        .iter()
        .zip(y.iter())
        .filter(|(ti, _)| **ti >= lo && **ti <= hi)
        .map(|(&ti, &yi)| (ti, yi))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_passes_through() {
        let t = [0.0, 1.0, 2.0];
        let y = [3.0, 2.0, 1.0];
        let (tc, yc) = condition(&t, &y, &Preprocess::default());
        assert_eq!(tc, t);
        assert_eq!(yc, y);
    }

    #[test]
    fn shift_and_reject_window() {
        let t: Vec<f64> = (0..10).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let pre = Preprocess {
            pump_delay_ms: 0.2,
            reject_start_ms: 0.25,
            reject_end_ms: 0.15,
        };
        let (tc, yc) = condition(&t, &y, &pre);
        // Shifted axis runs -0.2..=0.7; keep [0.05, 0.55].
        assert_eq!(yc, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!((tc[0] - 0.1).abs() < 1e-12);
    }
}
