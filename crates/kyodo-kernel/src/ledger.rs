//! Highlight ledger: who changed what, where, and why.
//!
//! Every non-empty agent write leaves a [`HighlightRecord`] holding an
//! anchor, never an absolute offset, so "show me that edit" still lands on
//! the right text after the document has moved underneath it.
//!
//! Records are immutable. The only deletion is pruning a record whose
//! anchor has gone. Records from other peers merge insert-if-absent.
//!
//! Peers exchange records over the presence channel: each publishes its own
//! as `highlight:<id>` fields and merges everyone else's
//! ([`HighlightLedger::replicate`]). A merged record stays after its
//! publisher disconnects.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use kyodo_crdt::{Anchor, PresenceChange, SharedPresence, TextBuffer};
use kyodo_types::{AgentId, Color, HighlightId, PeerId, TextRange, now_millis};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::view::TextView;

const EVENT_CAPACITY: usize = 256;

pub const HIGHLIGHT_FIELD_PREFIX: &str = "highlight:";

pub fn highlight_field(id: &HighlightId) -> String {
    format!("{HIGHLIGHT_FIELD_PREFIX}{id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRecord {
    pub id: HighlightId,
    pub owner: AgentId,
    pub anchor: Anchor,
    pub length: usize,
    pub color: Color,
    pub section: String,
    pub reason: String,
    pub snippet: String,
    pub created_at: u64,
}

/// Fields supplied by the writer; the ledger fills in the rest.
#[derive(Debug, Clone)]
pub struct HighlightDraft {
    pub owner: AgentId,
    pub anchor: Anchor,
    pub color: Color,
    pub section: String,
    pub reason: String,
    /// The inserted text. Its char count becomes the record length.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Recorded(HighlightRecord),
    Pruned(HighlightId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOutcome {
    /// Selected and scrolled to this span.
    Focused(TextRange),
    /// The edit no longer exists in the document.
    Gone,
    /// No such record.
    Unknown,
}

pub struct HighlightLedger {
    records: RwLock<IndexMap<HighlightId, HighlightRecord>>,
    events: broadcast::Sender<LedgerEvent>,
    snippet_len: usize,
}

impl HighlightLedger {
    pub fn new(snippet_len: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(IndexMap::new()),
            events,
            snippet_len,
        }
    }

    /// Store a new record under a fresh id.
    pub fn record(&self, draft: HighlightDraft) -> HighlightRecord {
        let record = HighlightRecord {
            id: HighlightId::new(),
            owner: draft.owner,
            anchor: draft.anchor,
            length: draft.text.chars().count(),
            color: draft.color,
            section: draft.section,
            reason: draft.reason,
            snippet: draft.text.chars().take(self.snippet_len).collect(),
            created_at: now_millis(),
        };
        self.records.write().insert(record.id, record.clone());
        debug!(id = %record.id, owner = %record.owner, length = record.length, "highlight recorded");
        let _ = self.events.send(LedgerEvent::Recorded(record.clone()));
        record
    }

    /// Merge a record replicated from another peer. Returns whether it was new.
    pub fn merge_remote(&self, record: HighlightRecord) -> bool {
        {
            let mut records = self.records.write();
            if records.contains_key(&record.id) {
                return false;
            }
            records.insert(record.id, record.clone());
        }
        debug!(id = %record.id, owner = %record.owner, "highlight merged from peer");
        let _ = self.events.send(LedgerEvent::Recorded(record));
        true
    }

    pub fn get(&self, id: &HighlightId) -> Option<HighlightRecord> {
        self.records.read().get(id).cloned()
    }

    /// Oldest first.
    pub fn records(&self) -> Vec<HighlightRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Where the record's text is right now.
    pub fn locate(&self, id: &HighlightId, buffer: &dyn TextBuffer) -> Option<Option<TextRange>> {
        let record = self.get(id)?;
        Some(
            buffer
                .resolve_anchor(&record.anchor)
                .map(|start| TextRange::at(start, record.length).clamp_to(buffer.len())),
        )
    }

    /// Select the record's current span in `view` and scroll to it.
    ///
    /// With `prune`, a record whose anchor has gone is deleted.
    pub fn focus(&self, id: &HighlightId, buffer: &dyn TextBuffer, view: &dyn TextView, prune: bool) -> FocusOutcome {
        match self.locate(id, buffer) {
            None => FocusOutcome::Unknown,
            Some(None) => {
                info!(id = %id, "edit no longer present");
                if prune && self.records.write().shift_remove(id).is_some() {
                    let _ = self.events.send(LedgerEvent::Pruned(*id));
                }
                FocusOutcome::Gone
            }
            Some(Some(range)) => {
                view.set_selection(range);
                if view.bounds(range.start).is_some() {
                    view.scroll_into_view(range.start);
                }
                FocusOutcome::Focused(range)
            }
        }
    }
}

/// Local state of one [`HighlightLedger::replicate`] loop.
struct Replica {
    ledger: Arc<HighlightLedger>,
    presence: SharedPresence,
    local: PeerId,
    /// Ids that came from peers; never re-published.
    merged: HashSet<HighlightId>,
}

impl Replica {
    fn publish(&self, record: &HighlightRecord) {
        if self.merged.contains(&record.id) {
            return;
        }
        match serde_json::to_value(record) {
            Ok(value) => self.presence.set_local_field(&highlight_field(&record.id), Some(value)),
            Err(e) => warn!(id = %record.id, "failed to encode highlight: {e}"),
        }
    }

    fn publish_all(&self) {
        for record in self.ledger.records() {
            self.publish(&record);
        }
    }

    fn merge(&mut self, peer: PeerId, key: &str, value: serde_json::Value) {
        match serde_json::from_value::<HighlightRecord>(value) {
            Ok(record) => {
                self.merged.insert(record.id);
                self.ledger.merge_remote(record);
            }
            Err(e) => debug!(peer = %peer, key, "ignoring undecodable highlight: {e}"),
        }
    }

    fn merge_all(&mut self) {
        for (peer, state) in self.presence.states() {
            if peer == self.local {
                continue;
            }
            for (key, value) in state {
                if key.starts_with(HIGHLIGHT_FIELD_PREFIX) {
                    self.merge(peer, &key, value);
                }
            }
        }
    }

    fn merge_field(&mut self, peer: PeerId, key: &str) {
        let value = self
            .presence
            .states()
            .get(&peer)
            .and_then(|state| state.get(key).cloned());
        if let Some(value) = value {
            self.merge(peer, key, value);
        }
    }
}

impl HighlightLedger {
    /// Publish this peer's records over `presence` and merge every other
    /// peer's, until cancelled.
    ///
    /// Pruned records are withdrawn. Whatever is already on either side when
    /// the loop starts is exchanged first.
    pub async fn replicate(self: Arc<Self>, presence: SharedPresence, cancel: CancellationToken) {
        let mut ledger_events = self.subscribe();
        let mut presence_events = presence.subscribe();
        let mut replica = Replica {
            local: presence.local_peer(),
            ledger: self,
            presence,
            merged: HashSet::new(),
        };
        replica.merge_all();
        replica.publish_all();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = ledger_events.recv() => match event {
                    Ok(LedgerEvent::Recorded(record)) => replica.publish(&record),
                    Ok(LedgerEvent::Pruned(id)) => replica.presence.set_local_field(&highlight_field(&id), None),
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "ledger replication lagged, republishing");
                        replica.publish_all();
                    }
                    Err(RecvError::Closed) => break,
                },
                change = presence_events.recv() => match change {
                    Ok(change) if change.peer() == replica.local => {}
                    Ok(PresenceChange::Updated { peer, key }) if key.starts_with(HIGHLIGHT_FIELD_PREFIX) => {
                        replica.merge_field(peer, &key);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "presence lagged, merging every peer");
                        replica.merge_all();
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
}
