//! Input processing: categorical one-hot expansion with feature grouping,
//! NaN-safe standardization, and target encoding (class one-hot with
//! multi-task blocks, or standardized regression targets). The fitted
//! details are stored on the forest and re-applied to test matrices.

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::CcfError;
use crate::numeric::nan_safe_column_stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnKind {
    Ordinal,
    /// Distinct category codes observed at fit time, sorted ascending. Each
    /// code expands to one indicator column.
    Categorical(Vec<f64>),
}

/// Everything needed to map a raw matrix into the space the trees were
/// grown in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputProcessDetails {
    columns: Vec<ColumnKind>,
    means: Array1<f64>,
    stds: Array1<f64>,
    /// Replace missing entries by the (standardized) column mean. False only
    /// under the per-tree random-draw policy, which keeps the sentinels.
    nan_to_mean: bool,
}

pub(crate) struct ProcessedInput {
    pub x: Array2<f64>,
    pub feature_group: Vec<Option<usize>>,
    pub details: InputProcessDetails,
}

/// Expand categoricals, standardize, and (optionally) impute the training
/// matrix. `is_ordinal[j]` declares column `j` ordinal; `None` means all
/// columns are ordinal.
pub(crate) fn process_input_data(
    x: ArrayView2<f64>,
    is_ordinal: Option<&[bool]>,
    nan_to_mean: bool,
) -> Result<ProcessedInput, CcfError> {
    let d = x.ncols();
    if let Some(flags) = is_ordinal {
        if flags.len() != d {
            return Err(CcfError::ShapeMismatch(format!(
                "is_ordinal has {} entries for {} columns",
                flags.len(),
                d
            )));
        }
    }

    let columns: Vec<ColumnKind> = (0..d)
        .map(|j| {
            if is_ordinal.map_or(true, |flags| flags[j]) {
                ColumnKind::Ordinal
            } else {
                let mut cats: Vec<f64> =
                    x.column(j).iter().copied().filter(|v| !v.is_nan()).collect();
                cats.sort_by(|a, b| a.partial_cmp(b).unwrap());
                cats.dedup();
                ColumnKind::Categorical(cats)
            }
        })
        .collect();

    let (expanded, feature_group) = expand(x, &columns);
    let (means, stds) = nan_safe_column_stats(expanded.view());
    let details = InputProcessDetails {
        columns,
        means,
        stds,
        nan_to_mean,
    };
    let x_out = details.standardize(expanded);
    Ok(ProcessedInput {
        x: x_out,
        feature_group,
        details,
    })
}

impl InputProcessDetails {
    /// Map a test matrix through the fitted expansion and scaling. Missing
    /// entries always fall back to the column mean here; the random-draw
    /// policy only applies while growing trees.
    pub(crate) fn apply(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, CcfError> {
        if x.ncols() != self.columns.len() {
            return Err(CcfError::ShapeMismatch(format!(
                "test matrix has {} columns, the forest was fit on {}",
                x.ncols(),
                self.columns.len()
            )));
        }
        let (expanded, _) = expand(x, &self.columns);
        let mut out = self.standardize(expanded);
        for v in out.iter_mut() {
            if v.is_nan() {
                *v = 0.0;
            }
        }
        Ok(out)
    }

    fn standardize(&self, mut expanded: Array2<f64>) -> Array2<f64> {
        for (j, mut col) in expanded.columns_mut().into_iter().enumerate() {
            for v in col.iter_mut() {
                if v.is_nan() {
                    if self.nan_to_mean {
                        *v = 0.0;
                    }
                } else {
                    *v = (*v - self.means[j]) / self.stds[j];
                }
            }
        }
        expanded
    }
}

fn expand(x: ArrayView2<f64>, columns: &[ColumnKind]) -> (Array2<f64>, Vec<Option<usize>>) {
    let n = x.nrows();
    let total: usize = columns
        .iter()
        .map(|c| match c {
            ColumnKind::Ordinal => 1,
            ColumnKind::Categorical(cats) => cats.len().max(1),
        })
        .sum();
    let mut out = Array2::zeros((n, total));
    let mut groups = Vec::with_capacity(total);
    let mut dst = 0;
    for (j, kind) in columns.iter().enumerate() {
        match kind {
            ColumnKind::Ordinal => {
                out.column_mut(dst).assign(&x.column(j));
                groups.push(Some(j));
                dst += 1;
            }
            ColumnKind::Categorical(cats) => {
                let width = cats.len().max(1);
                for (k, cat) in cats.iter().enumerate() {
                    for r in 0..n {
                        let v = x[[r, j]];
                        out[[r, dst + k]] = if v.is_nan() {
                            f64::NAN
                        } else if v == *cat {
                            1.0
                        } else {
                            0.0
                        };
                    }
                }
                for _ in 0..width {
                    groups.push(Some(j));
                }
                dst += width;
            }
        }
    }
    (out, groups)
}

/// Training targets as handed to the forest builder.
#[derive(Debug, Clone)]
pub enum Targets {
    /// One class name per row; distinct names become the class list.
    Labels(Vec<String>),
    /// Pre-encoded class indicators; multi-task blocks come from
    /// `task_ids` (or `separate_outputs`).
    OneHot(Array2<f64>),
    /// Real-valued outputs, standardized internally.
    Regression(Array2<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum TargetScale {
    Classes,
    Regression { mu: Array1<f64>, std: Array1<f64> },
}

pub(crate) struct EncodedTargets {
    pub y: Array2<f64>,
    pub class_names: Vec<String>,
    /// Class-column ranges, one per task; a single full-width task unless
    /// task_ids / separate_outputs carved the dimension up.
    pub tasks: Vec<Range<usize>>,
    pub scale: TargetScale,
    pub is_classification: bool,
}

pub(crate) fn encode_targets(
    targets: &Targets,
    n_rows: usize,
    task_ids: Option<&[usize]>,
    separate_outputs: bool,
) -> Result<EncodedTargets, CcfError> {
    match targets {
        Targets::Labels(labels) => {
            if labels.len() != n_rows {
                return Err(CcfError::ShapeMismatch(format!(
                    "{} labels for {} rows",
                    labels.len(),
                    n_rows
                )));
            }
            let mut names: Vec<String> = labels.clone();
            names.sort();
            names.dedup();
            if names.len() < 2 {
                log::warn!("training targets contain a single class; the forest will be stumps");
            }
            let k = names.len();
            let mut y = Array2::zeros((n_rows, k));
            for (i, label) in labels.iter().enumerate() {
                let idx = names.binary_search(label).expect("name list covers every label");
                y[[i, idx]] = 1.0;
            }
            Ok(EncodedTargets {
                y,
                class_names: names,
                tasks: vec![0..k],
                scale: TargetScale::Classes,
                is_classification: true,
            })
        }
        Targets::OneHot(y) => {
            if y.nrows() != n_rows {
                return Err(CcfError::ShapeMismatch(format!(
                    "target matrix has {} rows, X has {}",
                    y.nrows(),
                    n_rows
                )));
            }
            if separate_outputs {
                // Binary relevance: each 0/1 output column becomes its own
                // two-class task [absent, present].
                let d = y.ncols();
                let mut expanded = Array2::zeros((n_rows, 2 * d));
                for j in 0..d {
                    for i in 0..n_rows {
                        let present = y[[i, j]] != 0.0;
                        expanded[[i, 2 * j]] = if present { 0.0 } else { 1.0 };
                        expanded[[i, 2 * j + 1]] = if present { 1.0 } else { 0.0 };
                    }
                }
                let class_names = (0..d)
                    .flat_map(|j| [format!("out{}_absent", j), format!("out{}_present", j)])
                    .collect();
                let tasks = (0..d).map(|j| 2 * j..2 * j + 2).collect();
                return Ok(EncodedTargets {
                    y: expanded,
                    class_names,
                    tasks,
                    scale: TargetScale::Classes,
                    is_classification: true,
                });
            }
            let k = y.ncols();
            let tasks = resolve_tasks(task_ids, k)?;
            let class_names = (0..k).map(|j| format!("class_{}", j)).collect();
            Ok(EncodedTargets {
                y: y.clone(),
                class_names,
                tasks,
                scale: TargetScale::Classes,
                is_classification: true,
            })
        }
        Targets::Regression(y) => {
            if y.nrows() != n_rows {
                return Err(CcfError::ShapeMismatch(format!(
                    "target matrix has {} rows, X has {}",
                    y.nrows(),
                    n_rows
                )));
            }
            let (mu, std) = nan_safe_column_stats(y.view());
            let mut scaled = y.clone();
            for (j, mut col) in scaled.columns_mut().into_iter().enumerate() {
                for v in col.iter_mut() {
                    *v = (*v - mu[j]) / std[j];
                }
            }
            let k = y.ncols();
            Ok(EncodedTargets {
                y: scaled,
                class_names: Vec::new(),
                tasks: vec![0..k],
                scale: TargetScale::Regression { mu, std },
                is_classification: false,
            })
        }
    }
}

fn resolve_tasks(task_ids: Option<&[usize]>, k: usize) -> Result<Vec<Range<usize>>, CcfError> {
    let Some(starts) = task_ids else {
        return Ok(vec![0..k]);
    };
    if starts.first() != Some(&0) {
        return Err(CcfError::Config("task_ids must start at class column 0".into()));
    }
    if starts.windows(2).any(|w| w[0] >= w[1]) || *starts.last().unwrap() >= k {
        return Err(CcfError::Config(format!(
            "task_ids must be strictly ascending and below {}",
            k
        )));
    }
    let mut tasks = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(k);
        tasks.push(start..end);
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn ordinal_columns_are_standardized() {
        let x = array![[1.0], [2.0], [3.0]];
        let got = process_input_data(x.view(), None, true).unwrap();
        assert_eq!(got.feature_group, vec![Some(0)]);
        assert!((got.x.column(0).sum()).abs() < 1e-12, "Standardized column must center at 0");
    }

    #[test]
    fn categorical_columns_expand_into_one_group() {
        let x = array![[0.0, 10.0], [1.0, 20.0], [2.0, 10.0], [1.0, 20.0]];
        let flags = [false, true];
        let got = process_input_data(x.view(), Some(&flags), true).unwrap();
        // Three categories plus the ordinal column.
        assert_eq!(got.x.ncols(), 4);
        assert_eq!(
            got.feature_group,
            vec![Some(0), Some(0), Some(0), Some(1)]
        );
    }

    #[test]
    fn test_matrix_reuses_fit_categories() {
        let x = array![[0.0], [1.0]];
        let flags = [false];
        let got = process_input_data(x.view(), Some(&flags), true).unwrap();
        // Category 2 was never seen: both indicators stay at their
        // standardized zero level.
        let test = array![[2.0]];
        let mapped = got.details.apply(test.view()).unwrap();
        assert_eq!(mapped.ncols(), 2);
        assert!(mapped.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn mean_policy_zeroes_missing_entries() {
        let x = array![[1.0], [f64::NAN], [3.0]];
        let got = process_input_data(x.view(), None, true).unwrap();
        assert_eq!(got.x[[1, 0]], 0.0, "Missing entry must land on the column mean");
    }

    #[test]
    fn random_policy_keeps_sentinels_for_the_trees() {
        let x = array![[1.0], [f64::NAN], [3.0]];
        let got = process_input_data(x.view(), None, false).unwrap();
        assert!(got.x[[1, 0]].is_nan(), "Sentinel must survive for per-tree draws");
    }

    #[test]
    fn labels_encode_sorted_one_hot() {
        let targets = Targets::Labels(vec!["b".into(), "a".into(), "b".into()]);
        let enc = encode_targets(&targets, 3, None, false).unwrap();
        assert_eq!(enc.class_names, vec!["a", "b"]);
        assert_eq!(enc.y, array![[0.0, 1.0], [1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(enc.tasks, vec![0..2]);
    }

    #[test]
    fn task_ids_partition_the_class_dimension() {
        let y = array![[1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 1.0, 0.0]];
        let targets = Targets::OneHot(y);
        let enc = encode_targets(&targets, 2, Some(&[0, 2]), false).unwrap();
        assert_eq!(enc.tasks, vec![0..2, 2..4]);
    }

    #[test]
    fn bad_task_ids_are_config_errors() {
        let y = array![[1.0, 0.0], [0.0, 1.0]];
        let targets = Targets::OneHot(y);
        assert!(matches!(
            encode_targets(&targets, 2, Some(&[1]), false),
            Err(CcfError::Config(_))
        ));
        let y2 = array![[1.0, 0.0], [0.0, 1.0]];
        assert!(matches!(
            encode_targets(&Targets::OneHot(y2), 2, Some(&[0, 5]), false),
            Err(CcfError::Config(_))
        ));
    }

    #[test]
    fn separate_outputs_build_two_class_blocks() {
        let y = array![[1.0, 0.0], [0.0, 1.0]];
        let enc = encode_targets(&Targets::OneHot(y), 2, None, true).unwrap();
        assert_eq!(enc.y.ncols(), 4);
        assert_eq!(enc.tasks, vec![0..2, 2..4]);
        assert_eq!(enc.y.row(0).to_vec(), vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn regression_targets_are_scaled_and_recoverable() {
        let y = array![[10.0], [20.0], [30.0]];
        let enc = encode_targets(&Targets::Regression(y), 3, None, false).unwrap();
        let TargetScale::Regression { mu, std } = &enc.scale else {
            panic!("regression scale expected");
        };
        assert!((mu[0] - 20.0).abs() < 1e-12);
        for i in 0..3 {
            let back = enc.y[[i, 0]] * std[0] + mu[0];
            assert!((back - (10.0 + 10.0 * i as f64)).abs() < 1e-9, "Unscaling drifted");
        }
    }
}
