//! Per-tree inference: apply the stored rotation, then route whole row
//! batches down the tree, emitting a one-hot class row or the leaf mean.

use ndarray::{Array2, ArrayView2};

use crate::tree::{CcTree, LeafOutput, Node};

pub(crate) fn predict_rows(tree: &CcTree, x: ArrayView2<f64>, outputs: usize) -> Array2<f64> {
    let mut out = Array2::zeros((x.nrows(), outputs));
    let rows: Vec<usize> = (0..x.nrows()).collect();
    match &tree.rotation {
        Some(rot) => {
            let rotated = rot.apply(x);
            route(&tree.root, rotated.view(), rows, &mut out);
        }
        None => route(&tree.root, x, rows, &mut out),
    }
    out
}

fn route(node: &Node, x: ArrayView2<f64>, rows: Vec<usize>, out: &mut Array2<f64>) {
    match node {
        Node::Leaf { output, .. } => {
            for &r in &rows {
                match output {
                    LeafOutput::Label(label) => out[[r, *label]] = 1.0,
                    LeafOutput::Mean(mean) => {
                        for (k, &v) in mean.iter().enumerate() {
                            out[[r, k]] = v;
                        }
                    }
                }
            }
        }
        Node::Internal {
            in_cols,
            projection,
            partition,
            left,
            right,
            ..
        } => {
            let (mut go_left, mut go_right) = (Vec::new(), Vec::new());
            for &row in &rows {
                let value: f64 = in_cols
                    .iter()
                    .zip(projection)
                    .map(|(&c, &w)| x[[row, c]] * w)
                    .sum();
                if value <= *partition {
                    go_left.push(row);
                } else {
                    go_right.push(row);
                }
            }
            if !go_left.is_empty() {
                route(left, x, go_left, out);
            }
            if !go_right.is_empty() {
                route(right, x, go_right, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::Rotation;
    use ndarray::{array, Array1};

    fn stump(partition: f64) -> Node {
        Node::Internal {
            in_cols: vec![0],
            projection: vec![1.0],
            partition,
            training_counts: vec![2.0, 2.0],
            left: Box::new(Node::Leaf {
                training_counts: vec![2.0, 0.0],
                output: LeafOutput::Label(0),
            }),
            right: Box::new(Node::Leaf {
                training_counts: vec![0.0, 2.0],
                output: LeafOutput::Label(1),
            }),
        }
    }

    #[test]
    fn routes_rows_to_the_matching_leaf() {
        let tree = CcTree {
            root: stump(0.5),
            rotation: None,
            oob: None,
        };
        let x = array![[0.0], [1.0], [0.49], [0.51]];
        let pred = predict_rows(&tree, x.view(), 2);
        assert_eq!(pred, array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0]]);
    }

    #[test]
    fn regression_leaves_emit_their_mean() {
        let tree = CcTree {
            root: Node::Leaf {
                training_counts: vec![3.0],
                output: LeafOutput::Mean(vec![1.5, -0.5]),
            },
            rotation: None,
            oob: None,
        };
        let x = array![[0.0], [9.0]];
        let pred = predict_rows(&tree, x.view(), 2);
        assert_eq!(pred, array![[1.5, -0.5], [1.5, -0.5]]);
    }

    #[test]
    fn rotation_is_applied_before_routing() {
        // Rotation negates the single column; the stump's sides swap.
        let tree = CcTree {
            root: stump(0.0),
            rotation: Some(Rotation {
                r: array![[-1.0]],
                mu: Array1::zeros(1),
            }),
            oob: None,
        };
        let x = array![[1.0], [-1.0]];
        let pred = predict_rows(&tree, x.view(), 2);
        assert_eq!(pred, array![[1.0, 0.0], [0.0, 1.0]]);
    }
}
