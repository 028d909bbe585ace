use serde::{Deserialize, Serialize};

use crate::error::CcfError;

/// Depth cap for a single tree. `Stack` lets trees grow until the data runs
/// out, backed by a hard recursion guard at depth 490.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxDepth {
    Depth(usize),
    Stack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitCriterion {
    Gini,
    Info,
    Mse,
}

/// How candidate directions are padded with untransformed input axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginalAxes {
    No,
    /// Append identity columns spanning only the node's sampled columns.
    Sampled,
    /// Expand the projection back to all still-active columns, then append
    /// identity over that full active set.
    All,
}

/// Tie-break policy when two directions reach the same best gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirIfEqual {
    Rand,
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeRotation {
    None,
    Random,
    Pca,
    RotationForest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingValues {
    /// Replace missing entries with the column mean once, before any tree.
    Mean,
    /// Per tree, draw replacements from the column's empirical distribution.
    Random,
}

/// Which projection families contribute candidate split directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionKinds {
    pub cca: bool,
    pub pca: bool,
    pub cca_classwise: bool,
    pub original: bool,
    pub random: bool,
}

impl ProjectionKinds {
    pub fn none() -> Self {
        Self {
            cca: false,
            pca: false,
            cca_classwise: false,
            original: false,
            random: false,
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.cca || self.pca || self.cca_classwise || self.original || self.random
    }
}

impl Default for ProjectionKinds {
    fn default() -> Self {
        Self {
            cca: true,
            ..Self::none()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationForestParams {
    /// Number of column groups the feature space is partitioned into.
    pub groups: usize,
    /// Fraction of rows bootstrapped before fitting each group's PCA.
    pub sample_fraction: f64,
    /// Probability of leaving each class out of a group's bootstrap.
    pub class_leave_out: f64,
}

impl Default for RotationForestParams {
    fn default() -> Self {
        Self {
            groups: 3,
            sample_fraction: 0.75,
            class_leave_out: 0.5,
        }
    }
}

/// Every recognized knob of the forest builder. Read-only once training
/// starts; per-path state lives in an explicit context, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CcfOptions {
    pub n_trees: usize,
    pub min_points_for_split: usize,
    pub max_depth: MaxDepth,
    /// Feature groups to subsample per node; `None` resolves to
    /// ceil(log2(selectable)) + 1 at the node.
    pub lambda: Option<usize>,
    /// Bootstrap rows before fitting projections at each node.
    pub proj_boot: bool,
    /// On a degenerate projection bootstrap, fall back to the full node rows
    /// instead of terminating in a leaf.
    pub continue_proj_boot_degenerate: bool,
    pub x_variation_tol: f64,
    pub split_criterion: SplitCriterion,
    pub projections: ProjectionKinds,
    pub include_original_axes: OriginalAxes,
    pub dir_if_equal: DirIfEqual,
    pub bag_trees: bool,
    pub tree_rotation: TreeRotation,
    pub rotation_forest: RotationForestParams,
    pub missing_values: MissingValues,
    /// Treat each 0/1 target column as an independent two-class task.
    pub separate_outputs: bool,
    /// Start offsets of the multi-task class blocks within the class
    /// dimension; `None` means a single task spanning all classes.
    pub task_ids: Option<Vec<usize>>,
    pub use_parallel: bool,
    /// Discard each tree after its test predictions are recorded.
    pub keep_trees: bool,
    pub seed: u64,
}

impl Default for CcfOptions {
    fn default() -> Self {
        Self {
            n_trees: 100,
            min_points_for_split: 2,
            max_depth: MaxDepth::Stack,
            lambda: None,
            proj_boot: true,
            continue_proj_boot_degenerate: true,
            x_variation_tol: 1e-10,
            split_criterion: SplitCriterion::Gini,
            projections: ProjectionKinds::default(),
            include_original_axes: OriginalAxes::No,
            dir_if_equal: DirIfEqual::Rand,
            bag_trees: true,
            tree_rotation: TreeRotation::None,
            rotation_forest: RotationForestParams::default(),
            missing_values: MissingValues::Mean,
            separate_outputs: false,
            task_ids: None,
            use_parallel: true,
            keep_trees: true,
            seed: 0,
        }
    }
}

impl CcfOptions {
    pub fn validate(&self) -> Result<(), CcfError> {
        if self.n_trees == 0 {
            return Err(CcfError::Config("n_trees must be at least 1".into()));
        }
        if self.include_original_axes == OriginalAxes::No && !self.projections.any_enabled() {
            return Err(CcfError::Config(
                "no projections enabled and include_original_axes is No: \
                 nodes would have no candidate directions"
                    .into(),
            ));
        }
        if !self.x_variation_tol.is_finite() || self.x_variation_tol < 0.0 {
            return Err(CcfError::Config(format!(
                "x_variation_tol must be finite and non-negative, got {}",
                self.x_variation_tol
            )));
        }
        if let Some(lambda) = self.lambda {
            if lambda == 0 {
                return Err(CcfError::Config("lambda must be at least 1".into()));
            }
        }
        if self.separate_outputs && self.task_ids.is_some() {
            return Err(CcfError::Config(
                "separate_outputs derives its own task blocks and conflicts with task_ids".into(),
            ));
        }
        if self.tree_rotation == TreeRotation::RotationForest {
            let rf = &self.rotation_forest;
            if rf.groups == 0 {
                return Err(CcfError::Config(
                    "rotation_forest.groups must be at least 1".into(),
                ));
            }
            if !(rf.sample_fraction > 0.0 && rf.sample_fraction <= 1.0) {
                return Err(CcfError::Config(format!(
                    "rotation_forest.sample_fraction must be in (0, 1], got {}",
                    rf.sample_fraction
                )));
            }
            if !(0.0..1.0).contains(&rf.class_leave_out) {
                return Err(CcfError::Config(format!(
                    "rotation_forest.class_leave_out must be in [0, 1), got {}",
                    rf.class_leave_out
                )));
            }
        }
        Ok(())
    }

    /// Effective minimum node size; anything below 2 cannot split anyway.
    pub(crate) fn min_split_size(&self) -> usize {
        self.min_points_for_split.max(2)
    }

    /// Number of feature groups to draw at a node with `selectable` distinct
    /// groups available.
    pub(crate) fn lambda_for(&self, selectable: usize) -> usize {
        let lambda = self
            .lambda
            .unwrap_or_else(|| (selectable.max(1) as f64).log2().ceil() as usize + 1);
        lambda.clamp(1, selectable.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_validate() {
        CcfOptions::default().validate().expect("defaults must pass");
    }

    #[test]
    fn no_directions_is_a_config_error() {
        let opts = CcfOptions {
            projections: ProjectionKinds::none(),
            include_original_axes: OriginalAxes::No,
            ..CcfOptions::default()
        };
        assert!(matches!(opts.validate(), Err(CcfError::Config(_))));
    }

    #[test]
    fn axes_only_forest_is_allowed() {
        let opts = CcfOptions {
            projections: ProjectionKinds::none(),
            include_original_axes: OriginalAxes::Sampled,
            ..CcfOptions::default()
        };
        opts.validate().expect("axis-aligned forest is a valid config");
    }

    #[test]
    fn lambda_default_follows_log2() {
        let opts = CcfOptions::default();
        assert_eq!(opts.lambda_for(1), 1);
        assert_eq!(opts.lambda_for(8), 4);
        assert_eq!(opts.lambda_for(2), 2);
    }

    #[test]
    fn explicit_lambda_is_clamped() {
        let opts = CcfOptions {
            lambda: Some(10),
            ..CcfOptions::default()
        };
        assert_eq!(opts.lambda_for(4), 4);
        assert_eq!(opts.lambda_for(32), 10);
    }
}
