//! History store errors.

use lockstep_proto::Frame;
use thiserror::Error;

/// Errors from [`crate::Simulator`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// A frame lookup fell outside the retained window.
    ///
    /// Callers are expected to check `is_prehistoric` first, so this always
    /// indicates a caller bug.
    #[error("frame {frame} outside retained window [{oldest}, {newest}]")]
    OutOfRange {
        /// Requested frame.
        frame: Frame,
        /// Oldest retained frame.
        oldest: Frame,
        /// Current frame.
        newest: Frame,
    },

    /// An event targets a frame older than retained history.
    ///
    /// Never retried: the protocol layer answers with a full reset.
    #[error("event for prehistoric frame {frame} (oldest retained {oldest})")]
    PrehistoricEvent {
        /// Frame the event was meant for.
        frame: Frame,
        /// Oldest retained frame.
        oldest: Frame,
    },

    /// Contiguity or non-empty-history invariant would be broken.
    #[error("history invariant violated: {reason}")]
    InvariantViolation {
        /// What went wrong.
        reason: String,
    },

    /// Fast-forward target lies behind the current frame.
    #[error("cannot fast-forward backwards from frame {current} to {target}")]
    RewindRejected {
        /// Requested frame.
        target: Frame,
        /// Current frame.
        current: Frame,
    },
}

impl HistoryError {
    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation { reason: reason.into() }
    }

    /// Returns true if the error can be repaired by resynchronizing the peer
    /// that caused it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PrehistoricEvent { .. })
    }
}
