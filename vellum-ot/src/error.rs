//! Pipeline error types.

use vellum_core::TreeError;

/// Errors surfaced by the capture/synthesis pipeline.
///
/// Recoverable local conditions (skipped records, redundant cache calls)
/// are absorbed and logged where they occur; only conditions the caller
/// must react to surface here.
#[derive(Debug, Clone)]
pub enum OtError {
    /// Observation could not attach: the live-tree root is gone.
    InvalidRoot,
    /// A live-tree operation failed.
    Tree(String),
    /// An op could not be applied at its resolved address.
    Apply(String),
    /// The shared document rejected a batch beyond the retry policy;
    /// the session must re-sync from authoritative state.
    SyncFault(String),
    /// A channel or handle the pipeline depends on has gone away.
    Closed(String),
}

impl std::fmt::Display for OtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRoot => write!(f, "Observation root is not in the tree"),
            Self::Tree(e) => write!(f, "Tree error: {e}"),
            Self::Apply(e) => write!(f, "Apply error: {e}"),
            Self::SyncFault(e) => write!(f, "Synchronization fault: {e}"),
            Self::Closed(e) => write!(f, "Closed: {e}"),
        }
    }
}

impl std::error::Error for OtError {}

impl From<TreeError> for OtError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::InvalidRoot(_) => Self::InvalidRoot,
            other => Self::Tree(other.to_string()),
        }
    }
}
