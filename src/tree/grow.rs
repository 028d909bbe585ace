//! Recursive node induction: termination checks, feature-group subsampling
//! with variance-based resampling, projection bootstrap, the two-point
//! maximum-margin fallback, projection fitting, split search, and leaf
//! finalization.
//!
//! Per-path state (the active feature groups and the ancestral class
//! proportions) travels in an explicit [`PathContext`] that children extend;
//! the options themselves stay read-only. A node's chosen split is captured
//! as a plain [`PlannedSplit`] record which a single commit function turns
//! into an internal node and the two child recursions.

use ndarray::{concatenate, Array2, Axis};
use rand::seq::index;
use rand::Rng;

use crate::error::CcfError;
use crate::numeric::{any_column_varies, column_varies, safe_div, two_unique_rows};
use crate::options::{CcfOptions, MaxDepth, OriginalAxes};
use crate::projection::fit_projections;
use crate::split::{evaluate_splits, partition_point};
use crate::tree::{gather_rows, LeafOutput, Node};

/// Hard recursion backstop under `MaxDepth::Stack`.
const STACK_DEPTH_GUARD: usize = 490;

/// A class column below this total mass is treated as unrepresented.
const CLASS_MASS_TOL: f64 = 1e-12;

pub(crate) struct GrowContext<'a, 'b> {
    pub x: ndarray::ArrayView2<'a, f64>,
    pub y: ndarray::ArrayView2<'b, f64>,
    pub options: &'b CcfOptions,
    pub is_classification: bool,
}

/// Root-to-node state. Extended immutably at each recursion step; the
/// feature groups may additionally be invalidated for a whole subtree by the
/// resampling loop.
#[derive(Debug, Clone)]
pub(crate) struct PathContext {
    feature_group: Vec<Option<usize>>,
    /// Class-proportion vectors from the root down, oldest first.
    ancestral: Vec<Vec<f64>>,
}

impl PathContext {
    pub(crate) fn root(feature_group: Vec<Option<usize>>) -> Self {
        Self {
            feature_group,
            ancestral: Vec::new(),
        }
    }

    fn extended(&self, probs: Vec<f64>) -> Self {
        let mut child = self.clone();
        child.ancestral.push(probs);
        child
    }
}

/// The computed split of one node, ready to be committed.
struct PlannedSplit {
    node_cols: Vec<usize>,
    projection: Vec<f64>,
    partition: f64,
    left_rows: Vec<usize>,
    right_rows: Vec<usize>,
}

pub(crate) fn grow_node<R: Rng + ?Sized>(
    ctx: &GrowContext,
    rows: Vec<usize>,
    depth: usize,
    mut path: PathContext,
    rng: &mut R,
) -> Result<Node, CcfError> {
    let opts = ctx.options;
    let tol = opts.x_variation_tol;
    let n = rows.len();

    if n < opts.min_split_size() {
        return Ok(make_leaf(ctx, &rows, &path, rng));
    }
    if target_is_degenerate(ctx, &rows, tol) {
        return Ok(make_leaf(ctx, &rows, &path, rng));
    }
    match opts.max_depth {
        MaxDepth::Depth(cap) if depth > cap => return Ok(make_leaf(ctx, &rows, &path, rng)),
        MaxDepth::Stack if depth > STACK_DEPTH_GUARD => {
            return Err(CcfError::RecursionLimit(depth))
        }
        _ => {}
    }

    let in_cols = subsample_features(ctx, &rows, &mut path, rng);
    if in_cols.is_empty() {
        return Ok(make_leaf(ctx, &rows, &path, rng));
    }

    // Rows the projections are fitted on; the split search itself always
    // sees the full node bag.
    let fit_rows: Vec<usize> = if opts.proj_boot {
        let boot: Vec<usize> = (0..n).map(|_| rows[rng.gen_range(0..n)]).collect();
        if fit_bag_is_degenerate(ctx, &boot, &in_cols, tol) {
            if !opts.continue_proj_boot_degenerate {
                return Ok(make_leaf(ctx, &rows, &path, rng));
            }
            rows.clone()
        } else {
            boot
        }
    } else {
        rows.clone()
    };

    if opts.projections.any_enabled() {
        if let Some((a, b)) = two_unique_rows(ctx.x, &rows, &in_cols, tol) {
            let split = plan_two_point_split(ctx, &rows, &in_cols, a, b);
            return commit_split(ctx, &rows, depth, path, split, rng);
        }
    }

    let x_fit = gather_cols(ctx, &fit_rows, &in_cols);
    let y_fit = gather_rows(ctx.y, &fit_rows);
    let p = fit_projections(x_fit.view(), y_fit.view(), &opts.projections, rng);

    let (node_cols, p_full) = compose_original_axes(ctx, &path, &in_cols, p);
    if p_full.ncols() == 0 {
        return Ok(make_leaf(ctx, &rows, &path, rng));
    }
    if p_full.iter().any(|v| !v.is_finite()) {
        return Err(CcfError::Invariant("projection fit produced non-finite entries"));
    }

    let x_node = gather_cols(ctx, &rows, &node_cols);
    let u = x_node.dot(&p_full);

    // Directions without spread over this bag cannot produce a legal cut.
    let all_u_rows: Vec<usize> = (0..n).collect();
    let kept: Vec<usize> = (0..u.ncols())
        .filter(|&j| column_varies(u.view(), &all_u_rows, j, tol))
        .collect();
    if kept.is_empty() {
        return Ok(make_leaf(ctx, &rows, &path, rng));
    }
    let u_kept = u.select(Axis(1), &kept);

    let y_node = gather_rows(ctx.y, &rows);
    let Some(best) = evaluate_splits(
        u_kept.view(),
        y_node.view(),
        opts.split_criterion,
        opts.dir_if_equal,
        tol,
        rng,
    ) else {
        return Ok(make_leaf(ctx, &rows, &path, rng));
    };

    let (mut left_rows, mut right_rows) = (Vec::new(), Vec::new());
    for (i, &row) in rows.iter().enumerate() {
        if u_kept[[i, best.dir]] <= best.partition {
            left_rows.push(row);
        } else {
            right_rows.push(row);
        }
    }
    let split = PlannedSplit {
        node_cols,
        projection: p_full.column(kept[best.dir]).to_vec(),
        partition: best.partition,
        left_rows,
        right_rows,
    };
    commit_split(ctx, &rows, depth, path, split, rng)
}

/// Turn a planned split into an internal node, recursing into both sides.
fn commit_split<R: Rng + ?Sized>(
    ctx: &GrowContext,
    rows: &[usize],
    depth: usize,
    path: PathContext,
    split: PlannedSplit,
    rng: &mut R,
) -> Result<Node, CcfError> {
    if !split.partition.is_finite() {
        return Err(CcfError::Invariant("partition point is not finite"));
    }
    if split.left_rows.is_empty() || split.right_rows.is_empty() {
        return Err(CcfError::Invariant("proposed partition emptied a child"));
    }

    let training_counts = node_counts(ctx, rows);
    let child_path = if ctx.is_classification {
        let n = rows.len() as f64;
        path.extended(training_counts.iter().map(|&c| safe_div(c, n)).collect())
    } else {
        path
    };

    let left = grow_node(ctx, split.left_rows, depth + 1, child_path.clone(), rng)?;
    let right = grow_node(ctx, split.right_rows, depth + 1, child_path, rng)?;
    Ok(Node::Internal {
        in_cols: split.node_cols,
        projection: split.projection,
        partition: split.partition,
        training_counts,
        left: Box::new(left),
        right: Box::new(right),
    })
}

/// Maximum-margin hyperplane between the bag's two unique rows: the normal
/// is their difference over `in_cols`, the partition the midpoint of the two
/// projected values.
fn plan_two_point_split(
    ctx: &GrowContext,
    rows: &[usize],
    in_cols: &[usize],
    a: usize,
    b: usize,
) -> PlannedSplit {
    let w: Vec<f64> = in_cols.iter().map(|&c| ctx.x[[b, c]] - ctx.x[[a, c]]).collect();
    let project = |r: usize| -> f64 {
        in_cols.iter().zip(&w).map(|(&c, &wc)| ctx.x[[r, c]] * wc).sum()
    };
    let (pa, pb) = (project(a), project(b));
    let (lo, hi) = if pa <= pb { (pa, pb) } else { (pb, pa) };
    let partition = partition_point(lo, hi);

    let (mut left_rows, mut right_rows) = (Vec::new(), Vec::new());
    for &row in rows {
        if project(row) <= partition {
            left_rows.push(row);
        } else {
            right_rows.push(row);
        }
    }
    PlannedSplit {
        node_cols: in_cols.to_vec(),
        projection: w,
        partition,
        left_rows,
        right_rows,
    }
}

/// Draw feature groups without replacement, then keep resampling from the
/// leftover pool while drawn groups show no variation over the bag. Groups
/// that fail are invalidated for the whole subtree via the path context.
fn subsample_features<R: Rng + ?Sized>(
    ctx: &GrowContext,
    rows: &[usize],
    path: &mut PathContext,
    rng: &mut R,
) -> Vec<usize> {
    let tol = ctx.options.x_variation_tol;
    let mut selectable: Vec<usize> = path.feature_group.iter().flatten().copied().collect();
    selectable.sort_unstable();
    selectable.dedup();
    if selectable.is_empty() {
        return Vec::new();
    }

    let lambda = ctx.options.lambda_for(selectable.len());
    let mut chosen: Vec<usize> = index::sample(rng, selectable.len(), lambda)
        .into_iter()
        .map(|i| selectable[i])
        .collect();
    let mut pool: Vec<usize> = selectable
        .into_iter()
        .filter(|g| !chosen.contains(g))
        .collect();

    loop {
        let mut alive_cols: Vec<usize> = Vec::new();
        let mut dead_groups: Vec<usize> = Vec::new();
        for &g in &chosen {
            let mut any_varying = false;
            for (c, group) in path.feature_group.iter().enumerate() {
                if *group == Some(g) && column_varies(ctx.x, rows, c, tol) {
                    alive_cols.push(c);
                    any_varying = true;
                }
            }
            if !any_varying {
                dead_groups.push(g);
            }
        }
        if dead_groups.is_empty() {
            alive_cols.sort_unstable();
            return alive_cols;
        }
        for group in path.feature_group.iter_mut() {
            if group.map_or(false, |g| dead_groups.contains(&g)) {
                *group = None;
            }
        }
        chosen.retain(|g| !dead_groups.contains(g));
        if !pool.is_empty() {
            let need = dead_groups.len().min(pool.len());
            let mut drawn = index::sample(rng, pool.len(), need).into_vec();
            drawn.sort_unstable();
            for &i in drawn.iter().rev() {
                chosen.push(pool.swap_remove(i));
            }
        } else if chosen.is_empty() {
            return Vec::new();
        }
    }
}

/// Pad the fitted directions with untransformed axes per the configured
/// policy. In `All` mode the directions are first expanded to every column
/// whose group is still active on this path, so axes invalidated by this
/// node's resampling stay excluded.
fn compose_original_axes(
    ctx: &GrowContext,
    path: &PathContext,
    in_cols: &[usize],
    p: Array2<f64>,
) -> (Vec<usize>, Array2<f64>) {
    match ctx.options.include_original_axes {
        OriginalAxes::No => (in_cols.to_vec(), p),
        OriginalAxes::Sampled => {
            let eye = Array2::eye(in_cols.len());
            let stacked = concatenate(Axis(1), &[p.view(), eye.view()])
                .expect("direction blocks share the row count");
            (in_cols.to_vec(), stacked)
        }
        OriginalAxes::All => {
            let active: Vec<usize> = path
                .feature_group
                .iter()
                .enumerate()
                .filter_map(|(c, g)| g.map(|_| c))
                .collect();
            let mut expanded = Array2::zeros((active.len(), p.ncols()));
            for (i, &c) in in_cols.iter().enumerate() {
                if let Ok(pos) = active.binary_search(&c) {
                    expanded.row_mut(pos).assign(&p.row(i));
                }
            }
            let eye = Array2::eye(active.len());
            let stacked = concatenate(Axis(1), &[expanded.view(), eye.view()])
                .expect("direction blocks share the row count");
            (active, stacked)
        }
    }
}

fn target_is_degenerate(ctx: &GrowContext, rows: &[usize], tol: f64) -> bool {
    if ctx.is_classification {
        classes_with_mass(ctx, rows) < 2
    } else {
        let cols: Vec<usize> = (0..ctx.y.ncols()).collect();
        !any_column_varies(ctx.y, rows, &cols, tol)
    }
}

fn fit_bag_is_degenerate(ctx: &GrowContext, rows: &[usize], in_cols: &[usize], tol: f64) -> bool {
    target_is_degenerate(ctx, rows, tol) || !any_column_varies(ctx.x, rows, in_cols, tol)
}

fn classes_with_mass(ctx: &GrowContext, rows: &[usize]) -> usize {
    (0..ctx.y.ncols())
        .filter(|&k| rows.iter().map(|&r| ctx.y[[r, k]].abs()).sum::<f64>() > CLASS_MASS_TOL)
        .count()
}

fn node_counts(ctx: &GrowContext, rows: &[usize]) -> Vec<f64> {
    if ctx.is_classification {
        let mut counts = vec![0.0; ctx.y.ncols()];
        for &r in rows {
            for (k, c) in counts.iter_mut().enumerate() {
                *c += ctx.y[[r, k]];
            }
        }
        counts
    } else {
        vec![rows.len() as f64]
    }
}

fn make_leaf<R: Rng + ?Sized>(
    ctx: &GrowContext,
    rows: &[usize],
    path: &PathContext,
    rng: &mut R,
) -> Node {
    let training_counts = node_counts(ctx, rows);
    let output = if ctx.is_classification {
        LeafOutput::Label(choose_label(&training_counts, &path.ancestral, rng))
    } else {
        let n = rows.len() as f64;
        let means = (0..ctx.y.ncols())
            .map(|k| safe_div(rows.iter().map(|&r| ctx.y[[r, k]]).sum::<f64>(), n))
            .collect();
        LeafOutput::Mean(means)
    };
    Node::Leaf {
        training_counts,
        output,
    }
}

/// Majority label with ties broken against the ancestral class proportions,
/// newest first; a tie that survives the whole history falls to a uniform
/// draw.
fn choose_label<R: Rng + ?Sized>(counts: &[f64], ancestral: &[Vec<f64>], rng: &mut R) -> usize {
    let max = counts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut tied: Vec<usize> = (0..counts.len()).filter(|&i| counts[i] == max).collect();
    for probs in ancestral.iter().rev() {
        if tied.len() <= 1 {
            break;
        }
        let best = tied
            .iter()
            .map(|&i| probs[i])
            .fold(f64::NEG_INFINITY, f64::max);
        tied.retain(|&i| probs[i] == best);
    }
    if tied.len() > 1 {
        tied[rng.gen_range(0..tied.len())]
    } else {
        tied[0]
    }
}

fn gather_cols(ctx: &GrowContext, rows: &[usize], cols: &[usize]) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), cols.len()));
    for (i, &r) in rows.iter().enumerate() {
        for (j, &c) in cols.iter().enumerate() {
            out[[i, j]] = ctx.x[[r, c]];
        }
    }
    out
}
