//! Error taxonomy for the version control core.

/// Result type for version control operations
pub type Result<T> = std::result::Result<T, VcsError>;

/// Errors that can occur while manipulating the revision tree or the stage
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("Revision not found: {0}")]
    NotFound(String),

    #[error("Revision {0} has no delta data yet, pull it first")]
    ShallowRevision(String),

    #[error("Structural inconsistency: {0}")]
    StructuralInconsistency(String),

    #[error("Nothing selected")]
    EmptySelection,

    #[error("Stage index {index} is out of range (stage has {len} items)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Quick stash already holds changes")]
    QuickStashExists,

    #[error("Quick stash and uncommitted changes cannot be combined")]
    QuickStashConflict,

    #[error("Quick stash is empty")]
    NoQuickStash,

    #[error("Nothing to stash")]
    NothingToStash,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for VcsError {
    fn from(e: serde_json::Error) -> Self {
        VcsError::Serialization(e.to_string())
    }
}

/// Errors produced when remote revision descriptors cannot be folded into trees
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("Remote history has no root revision")]
    NoRoot,

    #[error("Remote history has {} root revisions: {}", .0.len(), .0.join(", "))]
    MultipleRoots(Vec<String>),

    #[error("Remote revisions form a cycle: {}", .0.join(", "))]
    Cycle(Vec<String>),
}
