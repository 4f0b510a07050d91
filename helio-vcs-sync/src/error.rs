//! Error types for the transport and sync sessions.

use helio_vcs_core::{ReconcileError, VcsError};

/// A request that never produced a response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Why a sync session stopped before completing
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote returned {status}: {}", .errors.first().map(String::as_str).unwrap_or("no details"))]
    Network { status: u16, errors: Vec<String> },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Sync session cancelled")]
    Cancelled,

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Connection(msg) => SyncError::Connection(msg),
            TransportError::Cancelled => SyncError::Cancelled,
        }
    }
}

impl SyncError {
    /// Messages to report to the user, server errors first
    pub fn messages(&self) -> Vec<String> {
        match self {
            SyncError::Network { errors, .. } if !errors.is_empty() => errors.clone(),
            other => vec![other.to_string()],
        }
    }

    /// The one line shown in a short notification
    pub fn first_message(&self) -> String {
        self.messages().into_iter().next().unwrap_or_default()
    }
}
