//! Summary statistics over fitted parameters.

/// Mean and sample standard deviation of the finite values in `values`.
///
/// Returns `None` when there are no finite values. The standard deviation is
/// 0 for a single value.
pub fn mean_std(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    if finite.len() == 1 {
        return Some((mean, 0.0));
    }
    let var = finite.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt()))
}
