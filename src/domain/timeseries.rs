//! Shared time-series math helpers.

/// Least-squares slope of evenly indexed samples (x = 0, 1, 2, ...).
///
/// Returns `None` for fewer than two samples or a degenerate x variance.
pub fn least_squares_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        ss_xy += dx * (y - mean_y);
        ss_xx += dx * dx;
    }

    if ss_xx == 0.0 {
        return None;
    }
    Some(ss_xy / ss_xx)
}

/// Length of the run of `true` values starting at index 0.
pub fn leading_true_run(flags: &[bool]) -> usize {
    flags.iter().take_while(|&&f| f).count()
}
