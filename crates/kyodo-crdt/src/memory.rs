//! In-memory sequence buffer with tombstones.
//!
//! Every char ever inserted keeps its [`UnitId`] forever; deletion only
//! flips a tombstone flag. That is what lets anchors tell "shifted" apart
//! from "gone".

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use kyodo_types::PeerId;

use crate::{Anchor, AnchorTarget, BufferEvent, CrdtError, Edit, Origin, Result, TextBuffer, UnitId};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Unit {
    id: UnitId,
    ch: char,
    deleted: bool,
}

#[derive(Debug, Default)]
struct Sequence {
    units: Vec<Unit>,
    next_seq: u64,
    visible: usize,
}

impl Sequence {
    /// Raw slot of the `index`-th visible unit, or `None` past the end.
    fn slot_of(&self, index: usize) -> Option<usize> {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, u)| !u.deleted)
            .nth(index)
            .map(|(slot, _)| slot)
    }

    fn position(&self, unit: UnitId) -> Option<usize> {
        self.units.iter().position(|u| u.id == unit)
    }

    /// Visible chars before `slot`.
    fn visible_before(&self, slot: usize) -> usize {
        self.units[..slot].iter().filter(|u| !u.deleted).count()
    }

    /// Slot just past the `index - 1`-th visible unit; tombstones after it
    /// stay to the right.
    fn gap_slot(&self, index: usize) -> usize {
        match index.checked_sub(1) {
            None => 0,
            Some(prev) => self.slot_of(prev).map_or(self.units.len(), |slot| slot + 1),
        }
    }

    fn insert_slot(&mut self, replica: u64, slot: usize, text: &str) {
        let mut fresh = Vec::with_capacity(text.len());
        for ch in text.chars() {
            fresh.push(Unit {
                id: UnitId {
                    replica,
                    seq: self.next_seq,
                },
                ch,
                deleted: false,
            });
            self.next_seq += 1;
        }
        self.visible += fresh.len();
        self.units.splice(slot..slot, fresh);
    }

    fn apply(&mut self, replica: u64, edit: &Edit) {
        match edit {
            Edit::Insert { index, text } => {
                let slot = self.slot_of(*index).unwrap_or(self.units.len());
                self.insert_slot(replica, slot, text);
            }
            Edit::Delete { index, len } => {
                let Some(start) = self.slot_of(*index) else {
                    return;
                };
                let mut remaining = *len;
                for unit in self.units[start..].iter_mut() {
                    if remaining == 0 {
                        break;
                    }
                    if !unit.deleted {
                        unit.deleted = true;
                        remaining -= 1;
                        self.visible -= 1;
                    }
                }
            }
        }
    }
}

/// Reference [`TextBuffer`] backed by a tombstoned `Vec`.
///
/// One instance is one replica. Tests and the CLI share a single instance
/// between every participant via `Arc`, which is the degenerate (but
/// faithful) case of a fully-synced replication group.
pub struct MemoryBuffer {
    replica: u64,
    seq: RwLock<Sequence>,
    events: broadcast::Sender<BufferEvent>,
}

impl MemoryBuffer {
    pub fn new(initial: &str) -> Self {
        Self::with_replica(PeerId::new().low_bits(), initial)
    }

    pub fn with_replica(replica: u64, initial: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut seq = Sequence::default();
        if !initial.is_empty() {
            seq.apply(replica, &Edit::insert(0, initial));
        }
        Self {
            replica,
            seq: RwLock::new(seq),
            events,
        }
    }
}

/// Check every edit against a running length before anything is applied.
fn validate(mut len: usize, edits: &[Edit]) -> Result<()> {
    for edit in edits {
        match edit {
            Edit::Insert { index, text } => {
                if *index > len {
                    return Err(CrdtError::PositionOutOfBounds { pos: *index, len });
                }
                len += text.chars().count();
            }
            Edit::Delete { index, len: n } => {
                let end = index + n;
                if end > len {
                    return Err(CrdtError::RangeOutOfBounds {
                        start: *index,
                        end,
                        len,
                    });
                }
                len -= n;
            }
        }
    }
    Ok(())
}

impl TextBuffer for MemoryBuffer {
    fn transact(&self, origin: Option<Origin>, edits: &[Edit]) -> Result<()> {
        if edits.is_empty() {
            return Ok(());
        }
        let len = {
            let mut seq = self.seq.write();
            validate(seq.visible, edits)?;
            for edit in edits {
                seq.apply(self.replica, edit);
            }
            seq.visible
        };
        trace!(?origin, edits = edits.len(), len, "transaction committed");
        // No subscribers is fine.
        let _ = self.events.send(BufferEvent {
            origin,
            edits: edits.to_vec(),
            len,
        });
        Ok(())
    }

    fn full_text(&self) -> String {
        self.seq
            .read()
            .units
            .iter()
            .filter(|u| !u.deleted)
            .map(|u| u.ch)
            .collect()
    }

    fn len(&self) -> usize {
        self.seq.read().visible
    }

    fn create_anchor(&self, index: usize) -> Anchor {
        let seq = self.seq.read();
        match seq.slot_of(index) {
            Some(slot) => Anchor::before(seq.units[slot].id),
            None => Anchor::end(),
        }
    }

    fn resolve_anchor(&self, anchor: &Anchor) -> Option<usize> {
        let seq = self.seq.read();
        match anchor.target() {
            AnchorTarget::End => Some(seq.visible),
            AnchorTarget::Before { unit } => {
                let slot = seq.position(unit)?;
                (!seq.units[slot].deleted).then(|| seq.visible_before(slot))
            }
            AnchorTarget::Gap { unit } => seq.position(unit).map(|slot| seq.visible_before(slot)),
        }
    }

    fn create_insertion_point(&self, index: usize) -> Anchor {
        let seq = self.seq.read();
        match seq.units.get(seq.gap_slot(index)) {
            Some(unit) => Anchor::gap(unit.id),
            None => Anchor::end(),
        }
    }

    fn insert_at(&self, at: &Anchor, text: &str, origin: Option<Origin>) -> Result<usize> {
        let (index, len) = {
            let mut seq = self.seq.write();
            let slot = match at.target() {
                AnchorTarget::End => seq.units.len(),
                AnchorTarget::Gap { unit } => seq.position(unit).ok_or(CrdtError::AnchorGone)?,
                AnchorTarget::Before { unit } => match seq.position(unit) {
                    Some(slot) if !seq.units[slot].deleted => slot,
                    _ => return Err(CrdtError::AnchorGone),
                },
            };
            let index = seq.visible_before(slot);
            if text.is_empty() {
                return Ok(index);
            }
            seq.insert_slot(self.replica, slot, text);
            (index, seq.visible)
        };
        trace!(?origin, index, len, "anchored insert committed");
        let _ = self.events.send(BufferEvent {
            origin,
            edits: vec![Edit::insert(index, text)],
            len,
        });
        Ok(index)
    }

    fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.events.subscribe()
    }
}
