/// Errors surfaced by forest construction and inference.
#[derive(Debug, thiserror::Error)]
pub enum CcfError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("Tree exceeded the recursion guard at depth {0}; set an explicit max_depth")]
    RecursionLimit(usize),
    #[error("Internal invariant violated: {0}")]
    Invariant(&'static str),
}
