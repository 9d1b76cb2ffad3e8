//! Anchor service: the engine's only way to hold a position across time.
//!
//! Offsets go stale the moment anything else touches the buffer. Callers
//! create an [`Anchor`] and resolve it immediately before each read or
//! mutation that needs an absolute offset.

use kyodo_crdt::{Anchor, SharedBuffer};
use thiserror::Error;

/// The anchored unit has been deleted.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("anchor target no longer present")]
pub struct Gone;

#[derive(Clone)]
pub struct AnchorService {
    buffer: SharedBuffer,
}

impl AnchorService {
    pub fn new(buffer: SharedBuffer) -> Self {
        Self { buffer }
    }

    /// Anchor at `offset`, clamped to the buffer length.
    pub fn create(&self, offset: usize) -> Anchor {
        self.buffer.create_anchor(offset.min(self.buffer.len()))
    }

    /// Insertion point at `offset`, clamped. Survives deletion of the text
    /// around it.
    pub fn create_insertion_point(&self, offset: usize) -> Anchor {
        self.buffer.create_insertion_point(offset.min(self.buffer.len()))
    }

    pub fn resolve(&self, anchor: &Anchor) -> Result<usize, Gone> {
        self.buffer.resolve_anchor(anchor).ok_or(Gone)
    }
}
