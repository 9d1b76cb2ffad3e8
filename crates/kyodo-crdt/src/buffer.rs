//! The replicated text buffer capability.

use std::fmt;
use std::sync::Arc;

use kyodo_types::AgentId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{Anchor, Result};

/// Tag attached to a transaction so observers can attribute it.
///
/// Local human typing carries no origin (`None`). Agent edits carry
/// `agent:<uuid>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Origin(String);

impl Origin {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The origin used for every mutation an agent session makes.
    pub fn agent(id: &AgentId) -> Self {
        Self(format!("agent:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_agent(&self) -> bool {
        self.0.starts_with("agent:")
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single mutation. Offsets are in chars, relative to the buffer state
/// produced by the preceding edits of the same transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Edit {
    Insert { index: usize, text: String },
    Delete { index: usize, len: usize },
}

impl Edit {
    pub fn insert(index: usize, text: impl Into<String>) -> Self {
        Self::Insert {
            index,
            text: text.into(),
        }
    }

    pub fn delete(index: usize, len: usize) -> Self {
        Self::Delete { index, len }
    }
}

/// Emitted once per committed transaction, local or remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferEvent {
    pub origin: Option<Origin>,
    pub edits: Vec<Edit>,
    /// Buffer length (chars) after the transaction.
    pub len: usize,
}

/// A shared, replicated, ordered character sequence.
///
/// All offsets are char indices. Implementations must be internally
/// synchronized: every method takes `&self` and may be called from any task.
pub trait TextBuffer: Send + Sync {
    /// Apply `edits` as one atomic transaction.
    ///
    /// Either every edit lands or none does. Observers see a single
    /// [`BufferEvent`] carrying `origin`.
    fn transact(&self, origin: Option<Origin>, edits: &[Edit]) -> Result<()>;

    /// Current text snapshot.
    fn full_text(&self) -> String;

    /// Length in chars.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a right-sticky anchor at `index`. Indices at or beyond the end
    /// clamp to an end-of-buffer anchor.
    fn create_anchor(&self, index: usize) -> Anchor;

    /// Current offset of `anchor`, or `None` if the unit it was bound to has
    /// been deleted. Insertion points always resolve.
    fn resolve_anchor(&self, anchor: &Anchor) -> Option<usize>;

    /// Create an insertion point for `index`: the gap right after the char
    /// at `index - 1`, ahead of any deleted text that followed it.
    ///
    /// Unlike [`create_anchor`](Self::create_anchor) the result never goes
    /// gone, and writers filling neighbouring deleted spans keep the order
    /// those spans had. Indices past the end clamp to end-of-buffer.
    fn create_insertion_point(&self, index: usize) -> Anchor;

    /// Insert `text` at `at`, placed in sequence order rather than by visible
    /// offset. Returns the offset of the first inserted char.
    ///
    /// Fails with [`CrdtError::AnchorGone`](crate::CrdtError::AnchorGone)
    /// when `at` is bound to a deleted unit.
    fn insert_at(&self, at: &Anchor, text: &str, origin: Option<Origin>) -> Result<usize>;

    /// Subscribe to committed transactions.
    fn subscribe(&self) -> broadcast::Receiver<BufferEvent>;

    fn insert(&self, index: usize, text: &str, origin: Option<Origin>) -> Result<()> {
        self.transact(origin, &[Edit::insert(index, text)])
    }

    fn delete(&self, index: usize, len: usize, origin: Option<Origin>) -> Result<()> {
        self.transact(origin, &[Edit::delete(index, len)])
    }
}

pub type SharedBuffer = Arc<dyn TextBuffer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_origin() {
        let id = AgentId::new();
        let origin = Origin::agent(&id);
        assert!(origin.is_agent());
        assert_eq!(origin.as_str(), format!("agent:{id}"));
        assert!(!Origin::new("document-switch").is_agent());
    }
}
