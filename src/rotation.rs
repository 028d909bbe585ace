//! Whole-tree input rotations: random orthogonal, PCA, and the
//! Rotation-Forest block-PCA scheme. The fitted pair `(R, mu)` is stored on
//! the tree and re-applied to test data as `(X - mu) * R`.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::linalg::{center_columns, complete_orthonormal_basis, economy_svd, random_orthogonal, rank_from_spectrum};
use crate::options::{RotationForestParams, TreeRotation};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Rotation {
    pub r: Array2<f64>,
    pub mu: Array1<f64>,
}

impl Rotation {
    pub(crate) fn apply(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut centered = x.to_owned();
        for mut row in centered.rows_mut() {
            row -= &self.mu;
        }
        centered.dot(&self.r)
    }
}

/// Fit the configured rotation on a tree's bagged rows. `labels` carries the
/// class index per bagged row and is only consulted by the Rotation-Forest
/// scheme; `None` (regression) samples from all rows.
pub(crate) fn fit_rotation<R: Rng + ?Sized>(
    kind: TreeRotation,
    x_bag: ArrayView2<f64>,
    labels: Option<&[usize]>,
    params: &RotationForestParams,
    rng: &mut R,
) -> Option<Rotation> {
    let d = x_bag.ncols();
    match kind {
        TreeRotation::None => None,
        TreeRotation::Random => Some(Rotation {
            r: random_orthogonal(d, rng),
            mu: column_means(x_bag),
        }),
        TreeRotation::Pca => {
            let (xc, mu) = center_columns(x_bag);
            let (_, s, v) = economy_svd(xc.view());
            let r = rank_from_spectrum(&s, 1e-9);
            let basis = complete_orthonormal_basis(v.slice(ndarray::s![.., ..r]));
            Some(Rotation { r: basis, mu })
        }
        TreeRotation::RotationForest => Some(rotation_forest(x_bag, labels, params, rng)),
    }
}

fn column_means(x: ArrayView2<f64>) -> Array1<f64> {
    x.mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()))
}

/// Partition the columns into random groups, fit a PCA per group on a
/// class-subsampled bootstrap, and assemble the components block-diagonally.
fn rotation_forest<R: Rng + ?Sized>(
    x_bag: ArrayView2<f64>,
    labels: Option<&[usize]>,
    params: &RotationForestParams,
    rng: &mut R,
) -> Rotation {
    let n = x_bag.nrows();
    let d = x_bag.ncols();
    let mu = column_means(x_bag);

    let mut cols: Vec<usize> = (0..d).collect();
    cols.shuffle(rng);
    let groups = params.groups.min(d).max(1);
    let group_size = (d + groups - 1) / groups;

    let mut r = Array2::zeros((d, d));
    for block in cols.chunks(group_size) {
        let rows = subsample_rows(n, labels, params, rng);
        let mut sub = Array2::zeros((rows.len(), block.len()));
        for (i, &row) in rows.iter().enumerate() {
            for (j, &col) in block.iter().enumerate() {
                sub[[i, j]] = x_bag[[row, col]];
            }
        }
        let (subc, _) = center_columns(sub.view());
        let (_, s, v) = economy_svd(subc.view());
        let rank = rank_from_spectrum(&s, 1e-9);
        let basis = complete_orthonormal_basis(v.slice(ndarray::s![.., ..rank]));
        for (bi, &ci) in block.iter().enumerate() {
            for (bj, &cj) in block.iter().enumerate() {
                r[[ci, cj]] = basis[[bi, bj]];
            }
        }
    }
    Rotation { r, mu }
}

/// Bootstrap row sample for one block: drop each class with the configured
/// probability (keeping at least one), then draw with replacement from the
/// surviving rows.
fn subsample_rows<R: Rng + ?Sized>(
    n: usize,
    labels: Option<&[usize]>,
    params: &RotationForestParams,
    rng: &mut R,
) -> Vec<usize> {
    let candidates: Vec<usize> = match labels {
        Some(labels) => {
            let k = labels.iter().copied().max().map_or(0, |m| m + 1);
            let mut keep: Vec<bool> = (0..k).map(|_| rng.gen::<f64>() >= params.class_leave_out).collect();
            if !keep.iter().any(|&b| b) {
                keep = vec![true; k];
            }
            let kept: Vec<usize> = (0..n).filter(|&i| keep[labels[i]]).collect();
            if kept.is_empty() {
                (0..n).collect()
            } else {
                kept
            }
        }
        None => (0..n).collect(),
    };
    let draw = ((candidates.len() as f64) * params.sample_fraction).ceil().max(1.0) as usize;
    (0..draw)
        .map(|_| candidates[rng.gen_range(0..candidates.len())])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_orthogonal(r: &Array2<f64>, what: &str) {
        let rtr = r.t().dot(r);
        for i in 0..r.ncols() {
            for j in 0..r.ncols() {
                let want = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (rtr[[i, j]] - want).abs() < 1e-8,
                    "{}: R^T R [{},{}] = {}",
                    what,
                    i,
                    j,
                    rtr[[i, j]]
                );
            }
        }
    }

    #[test]
    fn pca_rotation_is_orthogonal_and_centered() {
        let x = array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.1], [3.0, 2.9]];
        let mut rng = StdRng::seed_from_u64(11);
        let rot = fit_rotation(
            TreeRotation::Pca,
            x.view(),
            None,
            &RotationForestParams::default(),
            &mut rng,
        )
        .expect("pca rotation");
        assert_orthogonal(&rot.r, "pca");
        assert!((rot.mu[0] - 1.5).abs() < 1e-12, "Centroid off: {}", rot.mu[0]);
        let rotated = rot.apply(x.view());
        assert_eq!(rotated.dim(), (4, 2));
    }

    #[test]
    fn random_rotation_is_orthogonal() {
        let x = array![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]];
        let mut rng = StdRng::seed_from_u64(12);
        let rot = fit_rotation(
            TreeRotation::Random,
            x.view(),
            None,
            &RotationForestParams::default(),
            &mut rng,
        )
        .expect("random rotation");
        assert_orthogonal(&rot.r, "random");
    }

    #[test]
    fn rotation_forest_assembles_an_orthogonal_block_matrix() {
        let mut rng = StdRng::seed_from_u64(13);
        let n = 24;
        let x = Array2::from_shape_fn((n, 6), |(i, j)| {
            (i as f64 * 0.7 + j as f64) * if j % 2 == 0 { 1.0 } else { -0.5 }
                + rng.gen::<f64>()
        });
        let labels: Vec<usize> = (0..n).map(|i| i % 3).collect();
        let rot = fit_rotation(
            TreeRotation::RotationForest,
            x.view(),
            Some(&labels),
            &RotationForestParams {
                groups: 3,
                sample_fraction: 0.75,
                class_leave_out: 0.5,
            },
            &mut rng,
        )
        .expect("rotation forest");
        assert_orthogonal(&rot.r, "rotation forest");
    }

    #[test]
    fn none_means_no_rotation() {
        let x = array![[1.0], [2.0]];
        let mut rng = StdRng::seed_from_u64(14);
        assert!(fit_rotation(
            TreeRotation::None,
            x.view(),
            None,
            &RotationForestParams::default(),
            &mut rng
        )
        .is_none());
    }
}
