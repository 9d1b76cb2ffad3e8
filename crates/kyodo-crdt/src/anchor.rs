//! Position-stable anchors.

use serde::{Deserialize, Serialize};

/// Identity of one unit (char) in a replicated sequence.
///
/// `(replica, seq)` is unique across the whole replication group: each
/// replica numbers its own inserts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId {
    pub replica: u64,
    pub seq: u64,
}

/// What an anchor is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnchorTarget {
    /// The position immediately before this unit.
    Before { unit: UnitId },
    /// The gap immediately before this unit in sequence order. Deleting the
    /// unit leaves its tombstone in place, so the gap survives.
    Gap { unit: UnitId },
    /// End of the buffer. Never gone.
    End,
}

/// Opaque, immutable handle to a text position.
///
/// Issued by [`TextBuffer::create_anchor`](crate::TextBuffer::create_anchor)
/// and only meaningful to the buffer that issued it (or its replicas).
/// Serializable so it can travel in presence payloads and ledger records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Anchor {
    target: AnchorTarget,
}

impl Anchor {
    pub fn before(unit: UnitId) -> Self {
        Self {
            target: AnchorTarget::Before { unit },
        }
    }

    pub fn gap(unit: UnitId) -> Self {
        Self {
            target: AnchorTarget::Gap { unit },
        }
    }

    pub fn end() -> Self {
        Self {
            target: AnchorTarget::End,
        }
    }

    /// For buffer implementations only.
    pub fn target(&self) -> AnchorTarget {
        self.target
    }
}
