//! Candidate split-direction providers.
//!
//! Each enabled kind contributes columns to the d×p direction matrix a node
//! searches over. CCA directions come back unnormalized (their scale carries
//! no information for the sorted split search); PCA and Random are
//! orthonormal. Rank-deficient bags simply yield fewer columns.

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rand::Rng;

use crate::linalg::{center_columns, economy_svd, random_orthogonal, rank_from_spectrum};
use crate::options::ProjectionKinds;

const RANK_REL_TOL: f64 = 1e-9;

/// Fit the enabled projection families on a node's bag and stack their
/// directions column-wise into a d×p matrix. May return zero columns when
/// every enabled family degenerates on this bag.
pub(crate) fn fit_projections<R: Rng + ?Sized>(
    x_bag: ArrayView2<f64>,
    y_bag: ArrayView2<f64>,
    kinds: &ProjectionKinds,
    rng: &mut R,
) -> Array2<f64> {
    let d = x_bag.ncols();
    let mut blocks: Vec<Array2<f64>> = Vec::new();

    if kinds.cca {
        if let Some(p) = cca_directions(x_bag, y_bag) {
            blocks.push(p);
        }
    }
    if kinds.cca_classwise {
        for k in 0..y_bag.ncols() {
            let column = y_bag.slice(ndarray::s![.., k..k + 1]);
            if let Some(p) = cca_directions(x_bag, column) {
                blocks.push(p);
            }
        }
    }
    if kinds.pca {
        if let Some(p) = pca_directions(x_bag) {
            blocks.push(p);
        }
    }
    if kinds.random {
        blocks.push(random_orthogonal(d, rng));
    }
    if kinds.original {
        blocks.push(Array2::eye(d));
    }

    match blocks.len() {
        0 => Array2::zeros((d, 0)),
        1 => blocks.pop().unwrap(),
        _ => {
            let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
            concatenate(Axis(1), &views).expect("direction blocks share the row count")
        }
    }
}

/// Canonical correlation directions on the X side.
///
/// Both blocks are centered and reduced to their numerical rank through the
/// SVD; the canonical pairs are the SVD of the cross product of the two
/// orthonormal bases, mapped back to input coordinates.
fn cca_directions(x: ArrayView2<f64>, y: ArrayView2<f64>) -> Option<Array2<f64>> {
    let (xc, _) = center_columns(x);
    let (yc, _) = center_columns(y);

    let (ux, sx, vx) = economy_svd(xc.view());
    let rx = rank_from_spectrum(&sx, RANK_REL_TOL);
    if rx == 0 {
        return None;
    }
    let (uy, sy, _) = economy_svd(yc.view());
    let ry = rank_from_spectrum(&sy, RANK_REL_TOL);
    if ry == 0 {
        return None;
    }

    let cross = ux.slice(ndarray::s![.., ..rx]).t().dot(&uy.slice(ndarray::s![.., ..ry]));
    let (um, _, _) = economy_svd(cross.view());
    let pairs = rx.min(ry);

    // w = Vx * Sx^-1 * Um, one column per canonical pair.
    let mut scaled = vx.slice(ndarray::s![.., ..rx]).to_owned();
    for (j, mut col) in scaled.columns_mut().into_iter().enumerate() {
        col /= sx[j];
    }
    let w = scaled.dot(&um.slice(ndarray::s![.., ..pairs]));
    debug_assert!(w.iter().all(|v| v.is_finite()));
    Some(w)
}

/// Principal directions of the centered bag, one per non-negligible
/// singular value.
fn pca_directions(x: ArrayView2<f64>) -> Option<Array2<f64>> {
    let (xc, _) = center_columns(x);
    let (_, s, v) = economy_svd(xc.view());
    let r = rank_from_spectrum(&s, RANK_REL_TOL);
    if r == 0 {
        return None;
    }
    Some(v.slice(ndarray::s![.., ..r]).to_owned())
}
