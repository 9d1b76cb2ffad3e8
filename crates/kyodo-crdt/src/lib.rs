//! Replicated text buffer and ephemeral presence interfaces for Kyodo.
//!
//! The patch engine never owns the shared document. It reaches it through
//! two capabilities defined here:
//!
//! - [`TextBuffer`]: transactional insert/delete, full-text snapshots, and
//!   position-stable [`Anchor`]s that survive concurrent edits elsewhere.
//! - [`Presence`]: per-peer transient key/value state that disappears when
//!   the peer disconnects. Live agent cursors ride on it.
//!
//! Any CRDT or OT engine can sit behind these traits. The in-memory
//! implementations ([`MemoryBuffer`], [`PresenceHub`]) are what the kernel's
//! tests and the `kyodo` binary run against.
//!
//! # Anchor semantics
//!
//! Anchors are right-sticky: an anchor created at offset `i` is bound to the
//! unit currently at `i` (or to end-of-buffer when `i == len`). Inserting at
//! or before `i` shifts it; deleting the bound unit makes it resolve to
//! `None` ("gone") forever.
//!
//! Insertion points ([`TextBuffer::create_insertion_point`]) are bound to a
//! gap in the sequence instead of a char. They never go gone, and text
//! written through [`TextBuffer::insert_at`] lands where the gap stood even
//! after everything around it was deleted.

mod anchor;
mod buffer;
mod error;
mod memory;
mod presence;

pub use anchor::{Anchor, AnchorTarget, UnitId};
pub use buffer::{BufferEvent, Edit, Origin, SharedBuffer, TextBuffer};
pub use error::CrdtError;
pub use memory::MemoryBuffer;
pub use presence::{HubPresence, Presence, PresenceChange, PresenceHub, PresenceState, SharedPresence};

/// Result type for buffer operations.
pub type Result<T> = std::result::Result<T, CrdtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_survives_unrelated_edits() {
        let buf = MemoryBuffer::new("Tenant shall pay $2,000,000");
        let anchor = buf.create_anchor(17);

        buf.insert(0, "The ", None).unwrap();
        assert_eq!(buf.resolve_anchor(&anchor), Some(21));

        buf.delete(0, 4, None).unwrap();
        assert_eq!(buf.resolve_anchor(&anchor), Some(17));

        buf.insert(27, " per occurrence", None).unwrap();
        assert_eq!(buf.resolve_anchor(&anchor), Some(17));
    }

    #[test]
    fn test_anchor_gone_after_delete() {
        let buf = MemoryBuffer::new("abcdef");
        let anchor = buf.create_anchor(2);
        buf.delete(1, 3, None).unwrap();
        assert_eq!(buf.full_text(), "aef");
        assert_eq!(buf.resolve_anchor(&anchor), None);
    }
}
