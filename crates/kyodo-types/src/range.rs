//! Half-open character ranges.

use serde::{Deserialize, Serialize};

/// A half-open range `[start, end)` of char offsets into a text buffer.
///
/// Offsets count Unicode scalar values, never bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    /// Build a range from two endpoints in either order.
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// A range of `len` units starting at `start`.
    pub fn at(start: usize, len: usize) -> Self {
        Self {
            start,
            end: start + len,
        }
    }

    /// A collapsed range (a caret).
    pub fn caret(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    /// Clamp both endpoints to `limit`.
    pub fn clamp_to(&self, limit: usize) -> Self {
        Self {
            start: self.start.min(limit),
            end: self.end.min(limit),
        }
    }
}
