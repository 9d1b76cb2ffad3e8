//! Diff reconciler: turn a full rewrite into anchor-relative steps.
//!
//! A rewrite arrives as two whole texts. [`DiffScript::compute`] classifies
//! them char by char into equal/delete/insert spans; [`DiffScript::anchor`]
//! binds each span boundary to an [`Anchor`] in the live buffer so the
//! player can replay the script while other actors keep typing.
//!
//! When the live buffer has drifted from the text the rewrite was computed
//! against, boundaries are rebased through an [`OffsetMap`] first. Edits made
//! by others in the meantime are kept, not reverted.

use kyodo_crdt::{Anchor, TextBuffer};
use similar::{ChangeTag, TextDiff};

/// One classified span of a diff script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffStep {
    Equal(String),
    Delete(String),
    Insert(String),
}

impl DiffStep {
    fn tag(&self) -> ChangeTag {
        match self {
            Self::Equal(_) => ChangeTag::Equal,
            Self::Delete(_) => ChangeTag::Delete,
            Self::Insert(_) => ChangeTag::Insert,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Equal(t) | Self::Delete(t) | Self::Insert(t) => t,
        }
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.text().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text().is_empty()
    }
}

/// Char-granular edit script from one text to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffScript {
    steps: Vec<DiffStep>,
}

impl DiffScript {
    pub fn compute(old: &str, new: &str) -> Self {
        let diff = TextDiff::from_chars(old, new);
        let mut steps: Vec<DiffStep> = Vec::new();
        for change in diff.iter_all_changes() {
            let value = change.value();
            match steps.last_mut() {
                Some(last) if last.tag() == change.tag() => match last {
                    DiffStep::Equal(t) | DiffStep::Delete(t) | DiffStep::Insert(t) => t.push_str(value),
                },
                _ => steps.push(match change.tag() {
                    ChangeTag::Equal => DiffStep::Equal(value.to_string()),
                    ChangeTag::Delete => DiffStep::Delete(value.to_string()),
                    ChangeTag::Insert => DiffStep::Insert(value.to_string()),
                }),
            }
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[DiffStep] {
        &self.steps
    }

    /// True when the script changes nothing.
    pub fn is_identity(&self) -> bool {
        self.steps.iter().all(|s| matches!(s, DiffStep::Equal(_)))
    }

    /// Bind the script to the live buffer.
    ///
    /// `old` is the text the script was computed from. Insertion points are
    /// created for every span boundary up front, before any mutation, so
    /// later steps are immune to the shifting caused by earlier ones and a
    /// boundary survives others deleting the text around it. The first step
    /// always places the head at the start of the document.
    pub fn anchor(&self, old: &str, buffer: &dyn TextBuffer) -> Vec<AnchoredStep> {
        let live = buffer.full_text();
        let map = (live != old).then(|| OffsetMap::between(old, &live));
        let at = |old_offset: usize| {
            let offset = map.as_ref().map_or(old_offset, |m| m.map(old_offset));
            buffer.create_insertion_point(offset)
        };

        let mut old_pos = 0;
        let mut anchored = Vec::with_capacity(self.steps.len() + 1);
        anchored.push(AnchoredStep::Retain { to: at(0) });
        for step in &self.steps {
            match step {
                DiffStep::Equal(t) => {
                    old_pos += t.chars().count();
                    anchored.push(AnchoredStep::Retain { to: at(old_pos) });
                }
                DiffStep::Delete(t) => {
                    let from = at(old_pos);
                    old_pos += t.chars().count();
                    anchored.push(AnchoredStep::Delete {
                        from,
                        until: at(old_pos),
                        expected: t.clone(),
                    });
                }
                DiffStep::Insert(t) => anchored.push(AnchoredStep::Insert { text: t.clone() }),
            }
        }
        anchored
    }
}

/// A diff step bound to live buffer positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchoredStep {
    /// Move the head to `to` without mutating.
    Retain { to: Anchor },
    /// Delete `[from, until)` and leave the head at `until`.
    Delete {
        from: Anchor,
        until: Anchor,
        expected: String,
    },
    /// Insert at the head, one char at a time.
    Insert { text: String },
}

/// Maps char offsets in one text to char offsets in a later revision.
///
/// Offsets inside a span the later revision removed collapse to where that
/// span used to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetMap {
    table: Vec<usize>,
}

impl OffsetMap {
    pub fn between(from: &str, to: &str) -> Self {
        let diff = TextDiff::from_chars(from, to);
        let mut table = Vec::with_capacity(from.chars().count() + 1);
        let mut to_pos = 0;
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Equal => {
                    table.push(to_pos);
                    to_pos += 1;
                }
                ChangeTag::Delete => table.push(to_pos),
                ChangeTag::Insert => to_pos += 1,
            }
        }
        table.push(to_pos);
        Self { table }
    }

    pub fn map(&self, offset: usize) -> usize {
        let last = self.table.len().saturating_sub(1);
        self.table.get(offset).copied().unwrap_or_else(|| self.table[last])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyodo_crdt::MemoryBuffer;

    #[test]
    fn test_script_merges_runs() {
        let script = DiffScript::compute("pay $2,000,000 now", "pay $5,000,000 now");
        assert_eq!(
            script.steps(),
            &[
                DiffStep::Equal("pay $".into()),
                DiffStep::Delete("2".into()),
                DiffStep::Insert("5".into()),
                DiffStep::Equal(",000,000 now".into()),
            ]
        );
        assert!(!script.is_identity());
    }

    #[test]
    fn test_identity() {
        assert!(DiffScript::compute("same", "same").is_identity());
        assert!(DiffScript::compute("", "").is_identity());
    }

    #[test]
    fn test_pure_append() {
        let script = DiffScript::compute("Terms.", "Terms.\n\n5. REMOTE WORK");
        assert_eq!(
            script.steps(),
            &[
                DiffStep::Equal("Terms.".into()),
                DiffStep::Insert("\n\n5. REMOTE WORK".into())
            ]
        );
    }

    #[test]
    fn test_offset_map_across_concurrent_insert() {
        // Someone typed "big " before "cat" while the rewrite was pending.
        let map = OffsetMap::between("the cat", "the big cat");
        assert_eq!(map.map(0), 0);
        assert_eq!(map.map(4), 8);
        assert_eq!(map.map(7), 11);
        assert_eq!(map.map(99), 11);
    }

    #[test]
    fn test_offset_map_across_concurrent_delete() {
        let map = OffsetMap::between("abcdef", "abf");
        assert_eq!(map.map(1), 1);
        assert_eq!(map.map(3), 2);
        assert_eq!(map.map(5), 2);
        assert_eq!(map.map(6), 3);
    }

    #[test]
    fn test_anchor_creates_boundaries() {
        let old = "abc";
        let buffer = MemoryBuffer::new(old);
        let script = DiffScript::compute(old, "aXc");
        let steps = script.anchor(old, &buffer);
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0], AnchoredStep::Retain { to: buffer.create_insertion_point(0) });
        match &steps[2] {
            AnchoredStep::Delete { from, until, expected } => {
                assert_eq!(buffer.resolve_anchor(from), Some(1));
                assert_eq!(buffer.resolve_anchor(until), Some(2));
                assert_eq!(expected, "b");
            }
            other => panic!("expected delete, got {other:?}"),
        }
    }
}
