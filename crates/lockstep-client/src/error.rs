//! Client error types.

use lockstep_core::HistoryError;
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The operation needs history, but no `initialize` or `reset` has been
    /// applied yet.
    #[error("not initialized: {operation} before initialize")]
    NotInitialized {
        /// What was attempted.
        operation: &'static str,
    },

    /// Local history rejected the operation.
    #[error("history error: {0}")]
    History(#[from] HistoryError),
}

impl ClientError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Fatal errors indicate a broken game or a protocol bug. Everything
    /// else is repaired by waiting for `initialize` or by a reset.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::NotInitialized { .. } => false,
            Self::History(e) => !e.is_recoverable(),
        }
    }
}
