//! Recent tagged edits, newest first.
//!
//! Observes buffer transactions and keeps a capped list of the ones that
//! carry an origin (agent writes, document switches). Untagged local typing
//! is not recorded.

use std::collections::VecDeque;
use std::sync::Arc;

use kyodo_crdt::{BufferEvent, Edit, SharedBuffer};
use kyodo_types::now_millis;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HistoryKind {
    Insert,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub origin: String,
    pub snippet: String,
    pub at: u64,
}

pub struct EditHistory {
    entries: RwLock<VecDeque<HistoryEntry>>,
    capacity: usize,
    snippet_len: usize,
}

impl EditHistory {
    pub fn new(capacity: usize, snippet_len: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            snippet_len,
        }
    }

    /// Record one transaction. Untagged transactions are ignored.
    pub fn observe(&self, event: &BufferEvent) {
        let Some(origin) = &event.origin else {
            return;
        };
        let mut entries = self.entries.write();
        for edit in &event.edits {
            let (kind, snippet) = match edit {
                Edit::Insert { text, .. } => (HistoryKind::Insert, text.chars().take(self.snippet_len).collect()),
                Edit::Delete { len, .. } => (HistoryKind::Delete, format!("{len} characters removed")),
            };
            entries.push_front(HistoryEntry {
                kind,
                origin: origin.to_string(),
                snippet,
                at: now_millis(),
            });
        }
        entries.truncate(self.capacity);
    }

    /// Newest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Follow `buffer` until cancelled or the buffer goes away.
    pub async fn track(self: Arc<Self>, buffer: SharedBuffer, cancel: CancellationToken) {
        let mut events = buffer.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => self.observe(&event),
                    Err(RecvError::Lagged(missed)) => debug!(missed, "history lagged behind buffer"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyodo_crdt::Origin;

    fn event(origin: Option<&str>, edits: Vec<Edit>) -> BufferEvent {
        BufferEvent {
            origin: origin.map(Origin::new),
            edits,
            len: 0,
        }
    }

    #[test]
    fn test_newest_first_and_untagged_ignored() {
        let history = EditHistory::new(50, 120);
        history.observe(&event(Some("agent:a"), vec![Edit::insert(0, "J")]));
        history.observe(&event(None, vec![Edit::insert(1, "x")]));
        history.observe(&event(Some("agent:a"), vec![Edit::delete(0, 15)]));

        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, HistoryKind::Delete);
        assert_eq!(entries[0].snippet, "15 characters removed");
        assert_eq!(entries[1].snippet, "J");
        assert_eq!(entries[1].origin, "agent:a");
        assert_eq!(entries[1].kind.to_string(), "insert");
    }

    #[test]
    fn test_capacity_and_snippet() {
        let history = EditHistory::new(3, 4);
        for _ in 0..5 {
            history.observe(&event(Some("document-switch"), vec![Edit::insert(0, "abcdefgh")]));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.entries()[0].snippet, "abcd");
    }

    #[tokio::test]
    async fn test_track_follows_buffer() {
        use kyodo_crdt::{MemoryBuffer, TextBuffer};

        let buffer: SharedBuffer = Arc::new(MemoryBuffer::new(""));
        let history = Arc::new(EditHistory::new(50, 120));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(history.clone().track(buffer.clone(), cancel.clone()));
        tokio::task::yield_now().await;

        buffer.insert(0, "hi", Some(Origin::new("agent:z"))).unwrap();
        while history.is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(history.entries()[0].snippet, "hi");

        cancel.cancel();
        task.await.unwrap();
    }
}
