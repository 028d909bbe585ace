//! Forest driver: input processing, per-tree seed derivation, serial or
//! parallel tree growth, vote aggregation, and out-of-bag error.

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::CcfError;
use crate::input::{
    encode_targets, process_input_data, EncodedTargets, InputProcessDetails, Targets, TargetScale,
};
use crate::options::{CcfOptions, MissingValues, TreeRotation};
use crate::tree::{grow_tree, CcTree};

/// Out-of-bag error of a fitted forest. Only populated when bagging was on
/// and the trees were retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OobError {
    Unavailable,
    /// Fraction of misclassified (row, task) pairs.
    Classification(f64),
    /// Per-output mean squared error on the original target scale.
    Regression(Vec<f64>),
}

/// Aggregated forest output for a matrix of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Classification: mean per-class vote fraction. Regression: per-output
    /// means on the original target scale. Shape `n x K`.
    pub values: Array2<f64>,
    /// Classification only: winning class index per task (ties to the first
    /// argmax), shape `n x n_tasks`.
    pub labels: Option<Array2<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CcfForest {
    trees: Vec<CcTree>,
    options: CcfOptions,
    details: InputProcessDetails,
    class_names: Vec<String>,
    tasks: Vec<Range<usize>>,
    scale: TargetScale,
    is_classification: bool,
    n_outputs: usize,
    oob_error: OobError,
}

struct TreeOutcome {
    tree: Option<CcTree>,
    test_votes: Option<Array2<f64>>,
}

impl CcfForest {
    /// Fit a forest on a numeric training matrix. All columns are treated
    /// as ordinal; see [`CcfForest::fit_full`] for categorical inputs and
    /// train-time test prediction.
    pub fn fit(
        x: ArrayView2<f64>,
        targets: &Targets,
        options: &CcfOptions,
    ) -> Result<Self, CcfError> {
        Self::fit_full(x, targets, options, None, None).map(|(forest, _)| forest)
    }

    /// Full fitting entry point. `is_ordinal` flags categorical columns for
    /// one-hot expansion; when `x_test` is given its aggregated predictions
    /// are produced during the build, which allows `keep_trees = false` to
    /// discard each tree right after it has voted.
    pub fn fit_full(
        x: ArrayView2<f64>,
        targets: &Targets,
        options: &CcfOptions,
        is_ordinal: Option<&[bool]>,
        x_test: Option<ArrayView2<f64>>,
    ) -> Result<(Self, Option<Prediction>), CcfError> {
        options.validate()?;
        let n = x.nrows();
        if n == 0 || x.ncols() == 0 {
            return Err(CcfError::ShapeMismatch("empty training matrix".into()));
        }

        let nan_to_mean = options.missing_values == MissingValues::Mean;
        let processed = process_input_data(x, is_ordinal, nan_to_mean)?;
        let encoded: EncodedTargets = encode_targets(
            targets,
            n,
            options.task_ids.as_deref(),
            options.separate_outputs,
        )?;
        if encoded.is_classification && encoded.y.ncols() < 2 {
            log::warn!("only one class column is present; every tree degenerates to a stump");
        }

        // A whole-tree rotation mixes columns, which is meaningless across
        // the indicator columns of an expanded categorical.
        let has_expanded_groups = processed.feature_group.len() != x.ncols();
        if options.tree_rotation != TreeRotation::None && has_expanded_groups {
            return Err(CcfError::Config(
                "tree_rotation cannot be combined with categorical expansion".into(),
            ));
        }

        let x_test_mapped = match x_test {
            Some(xt) => Some(processed.details.apply(xt)?),
            None => None,
        };

        // Seeds are drawn up front from a master stream so serial and
        // parallel builds grow identical trees.
        let mut master = StdRng::seed_from_u64(options.seed);
        let seeds: Vec<u64> = (0..options.n_trees).map(|_| master.gen()).collect();

        let keep_trees = options.keep_trees || x_test_mapped.is_none();
        let n_outputs = encoded.y.ncols();
        let build = |seed: u64| -> Result<TreeOutcome, CcfError> {
            let tree = grow_tree(
                processed.x.view(),
                encoded.y.view(),
                &processed.feature_group,
                options,
                encoded.is_classification,
                seed,
            )?;
            let test_votes = x_test_mapped
                .as_ref()
                .map(|xt| tree.predict(xt.view(), n_outputs));
            Ok(TreeOutcome {
                tree: keep_trees.then_some(tree),
                test_votes,
            })
        };

        let outcomes: Vec<TreeOutcome> = if options.use_parallel {
            seeds
                .into_par_iter()
                .map(build)
                .collect::<Result<_, _>>()?
        } else {
            seeds
                .into_iter()
                .map(build)
                .collect::<Result<_, _>>()?
        };

        let mut trees = Vec::new();
        let mut test_sum: Option<Array2<f64>> = None;
        for outcome in outcomes {
            if let Some(votes) = outcome.test_votes {
                match &mut test_sum {
                    Some(sum) => *sum += &votes,
                    None => test_sum = Some(votes),
                }
            }
            if let Some(tree) = outcome.tree {
                trees.push(tree);
            }
        }
        log::debug!(
            "grew {} trees ({} retained) on {} rows x {} expanded columns",
            options.n_trees,
            trees.len(),
            n,
            processed.x.ncols()
        );

        let mut forest = Self {
            trees,
            options: options.clone(),
            details: processed.details,
            class_names: encoded.class_names,
            tasks: encoded.tasks,
            scale: encoded.scale,
            is_classification: encoded.is_classification,
            n_outputs,
            oob_error: OobError::Unavailable,
        };
        forest.oob_error = forest.compute_oob_error(targets, n);

        let test_prediction = test_sum
            .map(|sum| forest.aggregate(sum, options.n_trees as f64));
        Ok((forest, test_prediction))
    }

    /// Aggregated predictions for a raw test matrix (same column layout as
    /// the training input).
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Prediction, CcfError> {
        if self.trees.is_empty() {
            return Err(CcfError::Config(
                "forest holds no trees (grown with keep_trees = false)".into(),
            ));
        }
        let mapped = self.details.apply(x)?;
        let mut sum = Array2::zeros((mapped.nrows(), self.n_outputs));
        for tree in &self.trees {
            sum += &tree.predict(mapped.view(), self.n_outputs);
        }
        Ok(self.aggregate(sum, self.trees.len() as f64))
    }

    /// Mean per-class vote fractions; classification forests only.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, CcfError> {
        if !self.is_classification {
            return Err(CcfError::Config(
                "predict_proba is only defined for classification forests".into(),
            ));
        }
        Ok(self.predict(x)?.values)
    }

    pub fn oob_error(&self) -> &OobError {
        &self.oob_error
    }

    pub fn trees(&self) -> &[CcTree] {
        &self.trees
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn options(&self) -> &CcfOptions {
        &self.options
    }

    fn aggregate(&self, vote_sum: Array2<f64>, n_trees: f64) -> Prediction {
        let mut values = vote_sum / n_trees;
        if self.is_classification {
            let labels = self.task_argmax(values.view());
            Prediction {
                values,
                labels: Some(labels),
            }
        } else {
            if let TargetScale::Regression { mu, std } = &self.scale {
                for (j, mut col) in values.columns_mut().into_iter().enumerate() {
                    for v in col.iter_mut() {
                        *v = *v * std[j] + mu[j];
                    }
                }
            }
            Prediction {
                values,
                labels: None,
            }
        }
    }

    /// Winning absolute class index per task block, first argmax on ties.
    fn task_argmax(&self, values: ArrayView2<f64>) -> Array2<usize> {
        let mut labels = Array2::zeros((values.nrows(), self.tasks.len()));
        for (t, task) in self.tasks.iter().enumerate() {
            for i in 0..values.nrows() {
                let mut best = task.start;
                for j in task.clone() {
                    if values[[i, j]] > values[[i, best]] {
                        best = j;
                    }
                }
                labels[[i, t]] = best;
            }
        }
        labels
    }

    fn compute_oob_error(&self, targets: &Targets, n: usize) -> OobError {
        if !self.options.bag_trees || self.trees.is_empty() {
            return OobError::Unavailable;
        }
        let mut sum = Array2::<f64>::zeros((n, self.n_outputs));
        let mut hits = vec![0usize; n];
        for tree in &self.trees {
            let Some(oob) = &tree.oob else { continue };
            for (i, &row) in oob.indices.iter().enumerate() {
                hits[row] += 1;
                for k in 0..self.n_outputs {
                    sum[[row, k]] += oob.predictions[[i, k]];
                }
            }
        }
        let covered: Vec<usize> = (0..n).filter(|&i| hits[i] > 0).collect();
        if covered.is_empty() {
            return OobError::Unavailable;
        }

        match (&self.scale, targets) {
            (TargetScale::Classes, _) => {
                let truth = match encode_targets(
                    targets,
                    n,
                    self.options.task_ids.as_deref(),
                    self.options.separate_outputs,
                ) {
                    Ok(enc) => enc.y,
                    Err(_) => return OobError::Unavailable,
                };
                let mut wrong = 0usize;
                let mut total = 0usize;
                for &i in &covered {
                    for task in &self.tasks {
                        let pred = row_argmax(sum.view(), i, task);
                        let want = row_argmax(truth.view(), i, task);
                        total += 1;
                        if pred != want {
                            wrong += 1;
                        }
                    }
                }
                OobError::Classification(wrong as f64 / total as f64)
            }
            (TargetScale::Regression { mu, std }, Targets::Regression(y_raw)) => {
                let mut mse = vec![0.0; self.n_outputs];
                for &i in &covered {
                    for k in 0..self.n_outputs {
                        let mean = sum[[i, k]] / hits[i] as f64;
                        let unscaled = mean * std[k] + mu[k];
                        let diff = unscaled - y_raw[[i, k]];
                        mse[k] += diff * diff;
                    }
                }
                for v in mse.iter_mut() {
                    *v /= covered.len() as f64;
                }
                OobError::Regression(mse)
            }
            _ => OobError::Unavailable,
        }
    }
}

fn row_argmax(values: ArrayView2<f64>, row: usize, task: &Range<usize>) -> usize {
    let mut best = task.start;
    for j in task.clone() {
        if values[[row, j]] > values[[row, best]] {
            best = j;
        }
    }
    best
}
