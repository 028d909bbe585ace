//! Dense kernels backing the projection and rotation fitters.
//!
//! Everything here works on small per-node matrices (columns are the
//! subsampled features, rows the node's bag), so a one-sided Jacobi SVD is
//! plenty and keeps the crate free of a LAPACK backend.

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;

const JACOBI_MAX_SWEEPS: usize = 60;
const JACOBI_TOL: f64 = 1e-12;

/// Economy SVD `a = u * diag(s) * v^T` with singular values sorted
/// descending. `u` is n×k and `v` is m×k with `k = min(n, m)`; columns of
/// `u` belonging to zero singular values are zero.
pub(crate) fn economy_svd(a: ArrayView2<f64>) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
    if a.nrows() < a.ncols() {
        let (u, s, v) = economy_svd_tall(a.t().to_owned());
        return (v, s, u);
    }
    economy_svd_tall(a.to_owned())
}

/// One-sided Jacobi on a tall (n ≥ m) matrix: rotate column pairs until all
/// columns are mutually orthogonal, then read off norms as singular values.
fn economy_svd_tall(mut b: Array2<f64>) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
    let m = b.ncols();
    let mut v = Array2::eye(m);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let mut rotated = false;
        for p in 0..m {
            for q in (p + 1)..m {
                let col_p = b.column(p);
                let col_q = b.column(q);
                let alpha = col_p.dot(&col_p);
                let beta = col_q.dot(&col_q);
                let gamma = col_p.dot(&col_q);
                if gamma.abs() <= JACOBI_TOL * (alpha * beta).sqrt().max(JACOBI_TOL) {
                    continue;
                }
                rotated = true;
                let zeta = (beta - alpha) / (2.0 * gamma);
                let t = zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s_rot = c * t;
                rotate_columns(&mut b, p, q, c, s_rot);
                rotate_columns(&mut v, p, q, c, s_rot);
            }
        }
        if !rotated {
            break;
        }
    }

    let mut sigma = Array1::zeros(m);
    for j in 0..m {
        sigma[j] = b.column(j).dot(&b.column(j)).sqrt();
    }

    // Sort spectra descending and normalize the left vectors.
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&i, &j| sigma[j].partial_cmp(&sigma[i]).unwrap());

    let n = b.nrows();
    let mut u = Array2::zeros((n, m));
    let mut v_sorted = Array2::zeros((m, m));
    let mut s_sorted = Array1::zeros(m);
    for (dst, &src) in order.iter().enumerate() {
        s_sorted[dst] = sigma[src];
        v_sorted.column_mut(dst).assign(&v.column(src));
        if sigma[src] > 0.0 {
            u.column_mut(dst).assign(&(&b.column(src) / sigma[src]));
        }
    }
    (u, s_sorted, v_sorted)
}

fn rotate_columns(a: &mut Array2<f64>, p: usize, q: usize, c: f64, s: f64) {
    for i in 0..a.nrows() {
        let ap = a[[i, p]];
        let aq = a[[i, q]];
        a[[i, p]] = c * ap - s * aq;
        a[[i, q]] = s * ap + c * aq;
    }
}

/// Numerical rank given a descending spectrum.
pub(crate) fn rank_from_spectrum(s: &Array1<f64>, rel_tol: f64) -> usize {
    let largest = if s.is_empty() { 0.0 } else { s[0] };
    if largest <= 0.0 {
        return 0;
    }
    s.iter().take_while(|&&x| x > largest * rel_tol).count()
}

/// Subtract the column means; returns the centered matrix and the means.
pub(crate) fn center_columns(a: ArrayView2<f64>) -> (Array2<f64>, Array1<f64>) {
    let mu = a
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(a.ncols()));
    let mut out = a.to_owned();
    for mut row in out.rows_mut() {
        row -= &mu;
    }
    (out, mu)
}

/// Random orthogonal d×d matrix: Gaussian entries, then modified
/// Gram-Schmidt with re-draws for degenerate columns.
pub(crate) fn random_orthogonal<R: Rng + ?Sized>(d: usize, rng: &mut R) -> Array2<f64> {
    let mut q = Array2::zeros((d, d));
    for j in 0..d {
        loop {
            let mut col: Array1<f64> = (0..d).map(|_| rng.sample(StandardNormal)).collect();
            for k in 0..j {
                let qk = q.column(k);
                let proj = qk.dot(&col);
                col -= &(&qk * proj);
            }
            let norm = col.dot(&col).sqrt();
            if norm > 1e-8 {
                q.column_mut(j).assign(&(&col / norm));
                break;
            }
        }
    }
    q
}

/// Extend an orthonormal d×r column set to a full orthonormal d×d basis by
/// orthogonalizing standard basis vectors against it.
pub(crate) fn complete_orthonormal_basis(partial: ArrayView2<f64>) -> Array2<f64> {
    let d = partial.nrows();
    let r = partial.ncols().min(d);
    let mut q = Array2::zeros((d, d));
    q.slice_mut(s![.., ..r]).assign(&partial.slice(s![.., ..r]));

    let mut have = r;
    let mut axis = 0;
    while have < d && axis < d {
        let mut col = Array1::zeros(d);
        col[axis] = 1.0;
        for k in 0..have {
            let qk = q.column(k);
            let proj = qk.dot(&col);
            col -= &(&qk * proj);
        }
        let norm = col.dot(&col).sqrt();
        if norm > 1e-8 {
            q.column_mut(have).assign(&(&col / norm));
            have += 1;
        }
        axis += 1;
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_close(a: f64, b: f64, tol: f64, what: &str) {
        assert!((a - b).abs() < tol, "{}: {} vs {}", what, a, b);
    }

    #[test]
    fn svd_reconstructs_the_input() {
        let a = array![[3.0, 1.0], [1.0, 3.0], [1.0, 1.0], [0.0, 2.0]];
        let (u, sig, v) = economy_svd(a.view());
        let recon = u.dot(&Array2::from_diag(&sig)).dot(&v.t());
        for (x, y) in a.iter().zip(recon.iter()) {
            assert_close(*x, *y, 1e-9, "reconstruction entry");
        }
        assert!(sig[0] >= sig[1], "Spectrum not sorted descending");
    }

    #[test]
    fn svd_left_vectors_are_orthonormal() {
        let a = array![[2.0, 0.5, 1.0], [0.0, 1.0, -1.0], [1.0, 1.0, 0.0], [3.0, -2.0, 0.5]];
        let (u, _, v) = economy_svd(a.view());
        let utu = u.t().dot(&u);
        let vtv = v.t().dot(&v);
        for i in 0..3 {
            for j in 0..3 {
                let want = if i == j { 1.0 } else { 0.0 };
                assert_close(utu[[i, j]], want, 1e-9, "U^T U entry");
                assert_close(vtv[[i, j]], want, 1e-9, "V^T V entry");
            }
        }
    }

    #[test]
    fn svd_handles_wide_matrices() {
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let (u, sig, v) = economy_svd(a.view());
        let recon = u.dot(&Array2::from_diag(&sig)).dot(&v.t());
        for (x, y) in a.iter().zip(recon.iter()) {
            assert_close(*x, *y, 1e-9, "wide reconstruction entry");
        }
    }

    #[test]
    fn rank_detects_deficiency() {
        // Second column is twice the first.
        let a = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let (_, sig, _) = economy_svd(a.view());
        assert_eq!(rank_from_spectrum(&sig, 1e-9), 1, "Collinear columns must drop rank");
    }

    #[test]
    fn random_orthogonal_is_orthogonal() {
        let mut rng = StdRng::seed_from_u64(7);
        let q = random_orthogonal(5, &mut rng);
        let qtq = q.t().dot(&q);
        for i in 0..5 {
            for j in 0..5 {
                let want = if i == j { 1.0 } else { 0.0 };
                assert_close(qtq[[i, j]], want, 1e-9, "Q^T Q entry");
            }
        }
    }

    #[test]
    fn basis_completion_preserves_prefix() {
        let partial = array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
        let q = complete_orthonormal_basis(partial.view());
        assert_eq!(q.ncols(), 3);
        let qtq = q.t().dot(&q);
        for i in 0..3 {
            for j in 0..3 {
                let want = if i == j { 1.0 } else { 0.0 };
                assert_close(qtq[[i, j]], want, 1e-9, "completed basis entry");
            }
        }
        assert_close(q[[0, 0]], 1.0, 1e-12, "prefix column kept");
    }
}
