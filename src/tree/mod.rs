//! A single canonical correlation tree: the tagged node representation and
//! the per-tree driver (missing-value draws, bagging, optional whole-tree
//! rotation, growth, out-of-bag predictions).

pub(crate) mod grow;
pub(crate) mod predict;

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::CcfError;
use crate::options::{CcfOptions, MissingValues, TreeRotation};
use crate::rotation::{fit_rotation, Rotation};

/// What a leaf emits at inference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeafOutput {
    /// Class index into the forest's class list.
    Label(usize),
    /// Per-output mean of the standardized regression targets.
    Mean(Vec<f64>),
}

/// Tagged tree node. Internal nodes route on
/// `x[in_cols] . projection <= partition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Internal {
        in_cols: Vec<usize>,
        projection: Vec<f64>,
        partition: f64,
        training_counts: Vec<f64>,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        training_counts: Vec<f64>,
        output: LeafOutput,
    },
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn training_counts(&self) -> &[f64] {
        match self {
            Node::Internal { training_counts, .. } | Node::Leaf { training_counts, .. } => {
                training_counts
            }
        }
    }
}

/// Out-of-bag rows of one tree and the tree's predictions for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OobRecord {
    pub indices: Vec<usize>,
    pub predictions: Array2<f64>,
}

/// One grown tree plus its optional input rotation and OOB record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CcTree {
    pub(crate) root: Node,
    pub(crate) rotation: Option<Rotation>,
    pub(crate) oob: Option<OobRecord>,
}

impl CcTree {
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Route a test matrix through this tree; rows are `n_test`, columns the
    /// class/output dimension.
    pub fn predict(&self, x: ArrayView2<f64>, outputs: usize) -> Array2<f64> {
        predict::predict_rows(self, x, outputs)
    }
}

/// Grow one tree from the processed training data. `seed` fixes every
/// stochastic choice this tree makes.
pub(crate) fn grow_tree<'a>(
    x: ArrayView2<f64>,
    y: ArrayView2<'a, f64>,
    feature_group: &[Option<usize>],
    options: &'a CcfOptions,
    is_classification: bool,
    seed: u64,
) -> Result<CcTree, CcfError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = x.nrows();

    // Per-tree missing-value draws; under the mean policy the matrix was
    // already imputed upstream.
    let x_filled: Array2<f64> = match options.missing_values {
        MissingValues::Random => impute_random(x, &mut rng),
        MissingValues::Mean => x.to_owned(),
    };

    let (bag, oob_indices) = if options.bag_trees {
        let mut in_bag = vec![false; n];
        let bag: Vec<usize> = (0..n)
            .map(|_| {
                let i = rng.gen_range(0..n);
                in_bag[i] = true;
                i
            })
            .collect();
        let oob: Vec<usize> = (0..n).filter(|&i| !in_bag[i]).collect();
        (bag, oob)
    } else {
        ((0..n).collect(), Vec::new())
    };

    let rotation = if options.tree_rotation == TreeRotation::None {
        None
    } else {
        let x_bag = gather_rows(x_filled.view(), &bag);
        let labels: Option<Vec<usize>> =
            is_classification.then(|| bag.iter().map(|&r| argmax_row(y, r)).collect());
        fit_rotation(
            options.tree_rotation,
            x_bag.view(),
            labels.as_deref(),
            &options.rotation_forest,
            &mut rng,
        )
    };

    // Growth sees the rotated coordinates; inference re-applies the same
    // transform from the stored pair.
    let x_grow: Array2<f64> = match &rotation {
        Some(rot) => rot.apply(x_filled.view()),
        None => x_filled.clone(),
    };

    let ctx = grow::GrowContext {
        x: x_grow.view(),
        y,
        options,
        is_classification,
    };
    let root = grow::grow_node(
        &ctx,
        bag,
        1,
        grow::PathContext::root(feature_group.to_vec()),
        &mut rng,
    )?;

    let mut tree = CcTree {
        root,
        rotation,
        oob: None,
    };

    if options.bag_trees && !oob_indices.is_empty() {
        let x_oob = gather_rows(x_filled.view(), &oob_indices);
        let predictions = tree.predict(x_oob.view(), y.ncols());
        tree.oob = Some(OobRecord {
            indices: oob_indices,
            predictions,
        });
    }
    Ok(tree)
}

fn argmax_row(y: ArrayView2<f64>, row: usize) -> usize {
    let mut best = 0;
    for j in 1..y.ncols() {
        if y[[row, j]] > y[[row, best]] {
            best = j;
        }
    }
    best
}

pub(crate) fn gather_rows(x: ArrayView2<f64>, rows: &[usize]) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), x.ncols()));
    for (i, &r) in rows.iter().enumerate() {
        out.row_mut(i).assign(&x.row(r));
    }
    out
}

/// Replace each NaN with a value drawn from the column's finite entries.
fn impute_random<R: Rng + ?Sized>(x: ArrayView2<f64>, rng: &mut R) -> Array2<f64> {
    let mut out = x.to_owned();
    for c in 0..out.ncols() {
        let finite: Vec<f64> = x.column(c).iter().copied().filter(|v| !v.is_nan()).collect();
        for r in 0..out.nrows() {
            if out[[r, c]].is_nan() {
                out[[r, c]] = if finite.is_empty() {
                    0.0
                } else {
                    finite[rng.gen_range(0..finite.len())]
                };
            }
        }
    }
    out
}
