//! Canonical Correlation Forests.
//!
//! An ensemble of decision trees whose internal splits run along projection
//! directions fitted at each node by canonical correlation analysis (or
//! related linear projections) between the covariates and the class
//! encoding. Trees are optionally bagged and rotated as a whole; the forest
//! aggregates votes (classification) or means (regression).
//!
//! ```no_run
//! use ccf::{CcfForest, CcfOptions, Targets};
//! use ndarray::array;
//!
//! let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
//! let y = Targets::Labels(vec!["a".into(), "a".into(), "b".into(), "b".into()]);
//! let forest = CcfForest::fit(x.view(), &y, &CcfOptions::default()).unwrap();
//! let pred = forest.predict(x.view()).unwrap();
//! ```

mod error;
mod input;
mod linalg;
mod numeric;
mod projection;
mod rotation;
mod split;

pub mod forest;
pub mod options;
pub mod tree;

pub use error::CcfError;
pub use forest::{CcfForest, OobError, Prediction};
pub use input::Targets;
pub use options::{
    CcfOptions, DirIfEqual, MaxDepth, MissingValues, OriginalAxes, ProjectionKinds,
    RotationForestParams, SplitCriterion, TreeRotation,
};
pub use tree::{CcTree, LeafOutput, Node};
