//! Gap-buffer storage.
//!
//! [`GapBuffer`] is a growable array that keeps one contiguous run of free
//! slots (the gap) somewhere inside its backing vector. Writes first move
//! the gap to the write position, so an edit costs O(distance from the
//! previous edit) instead of O(len). Repeated edits at the same place, such
//! as tail appends or a burst of out-of-order arrivals near the tail, are
//! O(1) amortized.
//!
//! Walking the buffer without borrowing it goes through a detached
//! [`Cursor`]. A cursor records the buffer's generation when it was made;
//! any structural change that did not go through that cursor bumps the
//! generation, and the next use of the stale cursor fails with
//! [`BufferError::ConcurrentModification`].

mod gap;

pub use gap::{Cursor, GapBuffer};

use crate::error::ErrorCode;

/// Errors from gap-buffer operations.
///
/// None of these leave the buffer modified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// `offset..offset + count` does not fit in a buffer of `len` elements.
    #[error("range {offset}..{offset}+{count} is out of bounds for length {len}")]
    OutOfBounds {
        /// Requested start.
        offset: usize,
        /// Requested element count.
        count: usize,
        /// Current length.
        len: usize,
    },

    /// The cursor was created before a structural change made elsewhere.
    #[error("buffer was structurally modified since the cursor was created")]
    ConcurrentModification,
}

impl BufferError {
    /// Stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::OutOfBounds { .. } => ErrorCode::OutOfBounds,
            Self::ConcurrentModification => ErrorCode::ConcurrentModification,
        }
    }
}
