//! Small numeric predicates shared by the grower and the input pipeline.

use ndarray::{Array1, ArrayView2};

/// 0 when the denominator is 0, the plain quotient otherwise.
pub(crate) fn safe_div(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Does `x[rows, col]` spread more than `tol`?
///
/// Short-circuits as soon as the running spread exceeds the tolerance, so the
/// common case (first two rows already differ) touches two entries.
pub(crate) fn column_varies(x: ArrayView2<f64>, rows: &[usize], col: usize, tol: f64) -> bool {
    let mut iter = rows.iter().map(|&r| x[[r, col]]);
    let first = match iter.next() {
        Some(v) => v,
        None => return false,
    };
    let mut lo = first;
    let mut hi = first;
    for v in iter {
        if v < lo {
            lo = v;
        } else if v > hi {
            hi = v;
        }
        if hi - lo > tol {
            return true;
        }
    }
    false
}

pub(crate) fn any_column_varies(
    x: ArrayView2<f64>,
    rows: &[usize],
    cols: &[usize],
    tol: f64,
) -> bool {
    cols.iter().any(|&c| column_varies(x, rows, c, tol))
}

fn rows_equal(x: ArrayView2<f64>, a: usize, b: usize, cols: &[usize], tol: f64) -> bool {
    cols.iter().all(|&c| (x[[a, c]] - x[[b, c]]).abs() <= tol)
}

/// Exactly-two-unique-rows test over `x[rows, cols]`.
///
/// Excluding rows equal to the first row under `tol`, every remaining row
/// must equal a single other row; returns representatives of the two
/// distinct rows when that holds.
pub(crate) fn two_unique_rows(
    x: ArrayView2<f64>,
    rows: &[usize],
    cols: &[usize],
    tol: f64,
) -> Option<(usize, usize)> {
    let first = *rows.first()?;
    let mut other: Option<usize> = None;
    for &r in &rows[1..] {
        if rows_equal(x, first, r, cols, tol) {
            continue;
        }
        match other {
            None => other = Some(r),
            Some(o) => {
                if !rows_equal(x, o, r, cols, tol) {
                    return None;
                }
            }
        }
    }
    other.map(|o| (first, o))
}

/// Per-column mean and standard deviation ignoring NaN sentinels. A column
/// with zero spread (or no finite entries) reports a stddev of 1 so the
/// standardized values stay finite.
pub(crate) fn nan_safe_column_stats(x: ArrayView2<f64>) -> (Array1<f64>, Array1<f64>) {
    let d = x.ncols();
    let mut means = Array1::zeros(d);
    let mut stds = Array1::ones(d);
    for c in 0..d {
        let mut n = 0.0;
        let mut sum = 0.0;
        let mut sumsq = 0.0;
        for &v in x.column(c) {
            if v.is_nan() {
                continue;
            }
            n += 1.0;
            sum += v;
            sumsq += v * v;
        }
        let mean = safe_div(sum, n);
        let var = (safe_div(sumsq, n) - mean * mean).max(0.0);
        let std = var.sqrt();
        means[c] = mean;
        stds[c] = if std > 0.0 { std } else { 1.0 };
    }
    (means, stds)
}
