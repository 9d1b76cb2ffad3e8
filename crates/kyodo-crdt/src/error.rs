//! Error types for buffer operations.

use thiserror::Error;

/// Errors that can occur when mutating a text buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrdtError {
    /// Insert position beyond the end of the buffer.
    #[error("insert position {pos} out of bounds for buffer with length {len}")]
    PositionOutOfBounds { pos: usize, len: usize },

    /// Delete range extends beyond the end of the buffer.
    #[error("delete range {start}..{end} out of bounds for buffer with length {len}")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    /// The anchor's unit was deleted, or never belonged to this buffer.
    #[error("anchor no longer resolves")]
    AnchorGone,
}
