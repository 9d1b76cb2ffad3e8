//! Patch player behaviour under concurrent writers.
//!
//! Every test drives the real player against an in-memory buffer; some wrap
//! the buffer to inject "remote" transactions at precise points in the
//! agent's stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kyodo_crdt::{Anchor, BufferEvent, Edit, MemoryBuffer, Origin, PresenceHub, TextBuffer};
use kyodo_kernel::{
    EditActor, EditOperation, EngineConfig, MemoryView, PatchPlayer, PlayError, StaticApprover, StepGate,
    TracingObserver, Workspace,
};
use kyodo_types::{AgentId, Color, DisplayMeta, PeerId, TextRange};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Shared test setup
// ============================================================================

fn workspace_over(buffer: Arc<dyn TextBuffer>, pacing_ms: u64) -> Workspace {
    let view = Arc::new(MemoryView::new(buffer.clone()));
    let presence = Arc::new(PresenceHub::new().join(PeerId::new()));
    let config = EngineConfig {
        pacing_ms,
        ..Default::default()
    };
    Workspace::new(buffer, presence, view, Arc::new(StaticApprover(true)), config)
}

fn actor(name: &str) -> EditActor {
    EditActor {
        agent_id: AgentId::new(),
        display: DisplayMeta::new(name, Color::AGENT_FALLBACK, "Drafter"),
        section: "Document".into(),
        reason: "test".into(),
    }
}

fn gate(ws: &Workspace) -> StepGate {
    StepGate::new(ws.clock.ticket(), CancellationToken::new())
}

/// Two sessions with one operation each, typing 1ms per char, polled
/// together. `reversed` hands the second session's future to `join!` first.
async fn race(text: &str, first: EditOperation, second: EditOperation, reversed: bool) -> String {
    let ws = workspace_over(Arc::new(MemoryBuffer::new(text)), 1);
    let one = PatchPlayer::new(&ws, actor("Section 1 Agent"), gate(&ws), &TracingObserver);
    let two = PatchPlayer::new(&ws, actor("Section 2 Agent"), gate(&ws), &TracingObserver);
    let (first, second) = ([first], [second]);
    let (a, b) = if reversed {
        let (b, a) = tokio::join!(two.play_operations(&second), one.play_operations(&first));
        (a, b)
    } else {
        tokio::join!(one.play_operations(&first), two.play_operations(&second))
    };
    let text = ws.buffer.full_text();
    assert_eq!((a.applied, b.applied), (1, 1), "{text:?}");
    assert_eq!(ws.ledger.len(), 2);
    text
}

const ALPHABET: &[char] = &['a', 'b', 'c', ' ', '.', '\n', 'é'];

fn random_text(rng: &mut StdRng, max_len: usize) -> String {
    let len = rng.gen_range(0..=max_len);
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]).collect()
}

/// `text` with a few spans replaced, dropped, or grown.
fn mutate(rng: &mut StdRng, text: &str) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    for _ in 0..rng.gen_range(1..=4) {
        let at = rng.gen_range(0..=chars.len());
        let cut = rng.gen_range(0..=(chars.len() - at).min(5));
        let fresh: Vec<char> = random_text(rng, 6).chars().collect();
        chars.splice(at..at + cut, fresh);
    }
    chars.into_iter().collect()
}

/// Buffer wrapper that, right after the agent's `after`-th single-char
/// insert, has a remote peer type `text` at the position immediately
/// following that char.
struct InterferingBuffer {
    inner: MemoryBuffer,
    after: usize,
    text: &'static str,
    agent_inserts: AtomicUsize,
}

impl TextBuffer for InterferingBuffer {
    fn transact(&self, origin: Option<Origin>, edits: &[Edit]) -> kyodo_crdt::Result<()> {
        self.inner.transact(origin, edits)
    }

    fn insert_at(&self, at: &Anchor, text: &str, origin: Option<Origin>) -> kyodo_crdt::Result<usize> {
        let agent = origin.as_ref().is_some_and(Origin::is_agent);
        let index = self.inner.insert_at(at, text, origin)?;
        if agent && self.agent_inserts.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.inner.insert(index + 1, self.text, None)?;
        }
        Ok(index)
    }

    fn create_insertion_point(&self, index: usize) -> Anchor {
        self.inner.create_insertion_point(index)
    }

    fn full_text(&self) -> String {
        self.inner.full_text()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn create_anchor(&self, index: usize) -> Anchor {
        self.inner.create_anchor(index)
    }

    fn resolve_anchor(&self, anchor: &Anchor) -> Option<usize> {
        self.inner.resolve_anchor(anchor)
    }

    fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.inner.subscribe()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn lease_cap_is_replaced_and_highlighted() {
    let ws = workspace_over(Arc::new(MemoryBuffer::new("Tenant shall pay $2,000,000")), 0);
    let player = PatchPlayer::new(&ws, actor("Drafting Agent"), gate(&ws), &TracingObserver);

    let report = player
        .play_operations(&[EditOperation::new("$2,000,000", "$5,000,000")])
        .await;

    assert_eq!(ws.buffer.full_text(), "Tenant shall pay $5,000,000");
    assert_eq!(report.applied, 1);

    let records = ws.ledger.records();
    assert_eq!(records.len(), 1);
    let start = ws.buffer.resolve_anchor(&records[0].anchor).unwrap();
    assert_eq!(TextRange::at(start, records[0].length), TextRange::new(17, 27));
    assert_eq!(records[0].snippet, "$5,000,000");
}

#[tokio::test]
async fn missing_match_leaves_buffer_untouched() {
    let ws = workspace_over(Arc::new(MemoryBuffer::new("Tenant shall pay $2,000,000")), 0);
    let player = PatchPlayer::new(&ws, actor("Drafting Agent"), gate(&ws), &TracingObserver);

    let report = player
        .play_operations(&[EditOperation::new("$9,999", "$1")])
        .await;

    assert_eq!(ws.buffer.full_text(), "Tenant shall pay $2,000,000");
    assert_eq!(report.not_found, 1);
    assert!(report.aborted.is_none());
    assert!(ws.ledger.is_empty());
}

#[tokio::test]
async fn sequential_application_matches_plain_replace() {
    let original = "Party A: [A]. Party B: [B]. Term: [T].";
    let ops = [
        EditOperation::new("[A]", "Acme Corp"),
        EditOperation::new("[B]", "Jamie Rivera"),
        EditOperation::new("[T]", "two years"),
    ];
    let ws = workspace_over(Arc::new(MemoryBuffer::new(original)), 0);
    let player = PatchPlayer::new(&ws, actor("Drafting Agent"), gate(&ws), &TracingObserver);
    player.play_operations(&ops).await;

    let expected = ops
        .iter()
        .fold(original.to_string(), |text, op| text.replacen(&op.match_text, &op.replacement, 1));
    assert_eq!(ws.buffer.full_text(), expected);
}

#[tokio::test]
async fn remote_insert_before_anchor_is_never_overwritten() {
    let buffer = Arc::new(InterferingBuffer {
        inner: MemoryBuffer::new("Hello world!"),
        after: 2,
        text: "XXXXX",
        agent_inserts: AtomicUsize::new(0),
    });
    let ws = workspace_over(buffer, 0);
    let player = PatchPlayer::new(&ws, actor("Drafting Agent"), gate(&ws), &TracingObserver);

    let report = player
        .play_operations(&[EditOperation::new("world", "there")])
        .await;

    assert_eq!(ws.buffer.full_text(), "Hello thXXXXXere!");
    assert_eq!(report.applied, 1);
    assert_eq!(report.inserted_chars, 5);
}

#[tokio::test]
async fn remote_insert_upstream_shifts_agent() {
    // The remote peer types at the very start of the document instead.
    struct Upstream(MemoryBuffer, AtomicUsize);
    impl Upstream {
        /// The agent's second write (its first typed char) lets the peer in.
        fn after_agent_write(&self, origin: Option<&Origin>) -> kyodo_crdt::Result<()> {
            if origin.is_some_and(Origin::is_agent) && self.1.fetch_add(1, Ordering::SeqCst) == 1 {
                self.0.insert(0, ">> ", None)?;
            }
            Ok(())
        }
    }
    impl TextBuffer for Upstream {
        fn transact(&self, origin: Option<Origin>, edits: &[Edit]) -> kyodo_crdt::Result<()> {
            self.0.transact(origin.clone(), edits)?;
            self.after_agent_write(origin.as_ref())
        }
        fn insert_at(&self, at: &Anchor, text: &str, origin: Option<Origin>) -> kyodo_crdt::Result<usize> {
            let index = self.0.insert_at(at, text, origin.clone())?;
            self.after_agent_write(origin.as_ref())?;
            Ok(index)
        }
        fn create_insertion_point(&self, index: usize) -> Anchor {
            self.0.create_insertion_point(index)
        }
        fn full_text(&self) -> String {
            self.0.full_text()
        }
        fn len(&self) -> usize {
            self.0.len()
        }
        fn create_anchor(&self, index: usize) -> Anchor {
            self.0.create_anchor(index)
        }
        fn resolve_anchor(&self, anchor: &Anchor) -> Option<usize> {
            self.0.resolve_anchor(anchor)
        }
        fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
            self.0.subscribe()
        }
    }

    let ws = workspace_over(
        Arc::new(Upstream(MemoryBuffer::new("Pay [X] now."), AtomicUsize::new(0))),
        0,
    );
    let player = PatchPlayer::new(&ws, actor("Drafting Agent"), gate(&ws), &TracingObserver);
    player.play_operations(&[EditOperation::new("[X]", "$145,000")]).await;

    assert_eq!(ws.buffer.full_text(), ">> Pay $145,000 now.");
}

#[tokio::test]
async fn two_sessions_replace_disjoint_spans() {
    let ws = workspace_over(
        Arc::new(MemoryBuffer::new("Landlord: [LANDLORD]. Tenant: [TENANT].")),
        1,
    );
    let first = PatchPlayer::new(&ws, actor("Section 1 Agent"), gate(&ws), &TracingObserver);
    let second = PatchPlayer::new(&ws, actor("Section 2 Agent"), gate(&ws), &TracingObserver);

    let first_ops = [EditOperation::new("[LANDLORD]", "Acme Properties LLC")];
    let second_ops = [EditOperation::new("[TENANT]", "Jamie Rivera")];
    let (a, b) = tokio::join!(first.play_operations(&first_ops), second.play_operations(&second_ops));

    assert_eq!(a.applied, 1);
    assert_eq!(b.applied, 1);
    assert_eq!(
        ws.buffer.full_text(),
        "Landlord: Acme Properties LLC. Tenant: Jamie Rivera."
    );
    assert_eq!(ws.ledger.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn two_sessions_disjoint_spans_either_start_order() {
    for reversed in [false, true] {
        let text = race(
            "Landlord: [LANDLORD]. Tenant: [TENANT].",
            EditOperation::new("[LANDLORD]", "Acme Properties LLC"),
            EditOperation::new("[TENANT]", "Jamie Rivera"),
            reversed,
        )
        .await;
        assert_eq!(text, "Landlord: Acme Properties LLC. Tenant: Jamie Rivera.");
    }
}

#[tokio::test(start_paused = true)]
async fn adjacent_spans_keep_their_order() {
    for reversed in [false, true] {
        let text = race(
            "Parties: [A][B].",
            EditOperation::new("[A]", "alpha"),
            EditOperation::new("[B]", "beta"),
            reversed,
        )
        .await;
        assert_eq!(text, "Parties: alphabeta.", "reversed: {reversed}");
    }
}

#[tokio::test(start_paused = true)]
async fn spans_one_char_apart_keep_the_separator() {
    for reversed in [false, true] {
        let text = race(
            "x[A]y[B]z",
            EditOperation::new("[A]", "alpha"),
            EditOperation::new("[B]", "beta"),
            reversed,
        )
        .await;
        assert_eq!(text, "xalphaybetaz", "reversed: {reversed}");
    }
}

#[tokio::test(start_paused = true)]
async fn replacing_the_right_neighbour_does_not_strand_the_writer() {
    // The second session rewrites the very char the first one's text runs into.
    for reversed in [false, true] {
        let text = race(
            "x[A]y[B]z",
            EditOperation::new("[A]", "alpha"),
            EditOperation::new("y", "Y"),
            reversed,
        )
        .await;
        assert_eq!(text, "xalphaY[B]z", "reversed: {reversed}");
    }
}

#[tokio::test(start_paused = true)]
async fn version_bump_halts_mutation() {
    let ws = workspace_over(Arc::new(MemoryBuffer::new("Clause: [BODY]")), 10);
    let player = PatchPlayer::new(&ws, actor("Drafting Agent"), gate(&ws), &TracingObserver);
    let ops = [EditOperation::new("[BODY]", "ABCDEFGHIJKLMNOP")];

    let clock = ws.clock.clone();
    let bump = async {
        tokio::time::sleep(Duration::from_millis(35)).await;
        clock.bump();
    };
    let (report, ()) = tokio::join!(player.play_operations(&ops), bump);

    assert_eq!(report.aborted, Some(PlayError::Stale));
    let text = ws.buffer.full_text();
    let typed = text.strip_prefix("Clause: ").unwrap();
    assert!(typed.len() < 16, "typing continued after the bump: {text}");
    assert!("ABCDEFGHIJKLMNOP".starts_with(typed));

    // Nothing further lands once the run has returned.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ws.buffer.full_text(), text);
}

#[tokio::test]
async fn rewrite_round_trip_without_interference() {
    let old = "1. DUTIES\nThe Employee shall perform duties as assigned.\n";
    let new = "1. DUTIES\nThe Employee shall diligently perform all duties reasonably assigned.\n\n2. TERM\nOne year.";
    let ws = workspace_over(Arc::new(MemoryBuffer::new(old)), 0);
    let player = PatchPlayer::new(&ws, actor("Drafting Agent"), gate(&ws), &TracingObserver);

    let report = player.play_rewrite(old, new).await;

    assert_eq!(ws.buffer.full_text(), new);
    assert!(report.applied > 0);
    assert!(report.aborted.is_none());
}

#[tokio::test]
async fn rewrite_append_lands_at_end_after_concurrent_typing() {
    let old = "Terms.";
    let ws = workspace_over(Arc::new(MemoryBuffer::new(old)), 0);
    ws.buffer.insert(6, " More terms.", None).unwrap();

    let player = PatchPlayer::new(&ws, actor("Drafting Agent"), gate(&ws), &TracingObserver);
    player.play_rewrite(old, "Terms.\n\n5. REMOTE WORK").await;

    assert_eq!(ws.buffer.full_text(), "Terms. More terms.\n\n5. REMOTE WORK");
}

#[tokio::test]
async fn rewrite_round_trip_on_random_texts() {
    let mut rng = StdRng::seed_from_u64(0x6b79_6f64);
    for case in 0..64 {
        let old = random_text(&mut rng, 40);
        let new = mutate(&mut rng, &old);
        let ws = workspace_over(Arc::new(MemoryBuffer::new(&old)), 0);
        let player = PatchPlayer::new(&ws, actor("Drafting Agent"), gate(&ws), &TracingObserver);

        let report = player.play_rewrite(&old, &new).await;

        assert_eq!(ws.buffer.full_text(), new, "case {case}: {old:?} -> {new:?}");
        assert!(report.aborted.is_none());
        assert_eq!(report.gone, 0);
    }
}

#[tokio::test]
async fn sequential_application_on_random_operations() {
    let mut rng = StdRng::seed_from_u64(7);
    for case in 0..64 {
        let original = random_text(&mut rng, 40);
        let mut expected = original.clone();
        let mut ops = Vec::new();
        for _ in 0..rng.gen_range(1..=4) {
            let chars: Vec<char> = expected.chars().collect();
            if chars.is_empty() {
                break;
            }
            let start = rng.gen_range(0..chars.len());
            let end = rng.gen_range(start + 1..=chars.len().min(start + 6));
            let needle: String = chars[start..end].iter().collect();
            let replacement = random_text(&mut rng, 6);
            expected = expected.replacen(&needle, &replacement, 1);
            ops.push(EditOperation::new(needle, replacement));
        }

        let ws = workspace_over(Arc::new(MemoryBuffer::new(&original)), 0);
        let player = PatchPlayer::new(&ws, actor("Drafting Agent"), gate(&ws), &TracingObserver);
        let report = player.play_operations(&ops).await;

        assert_eq!(ws.buffer.full_text(), expected, "case {case}: {original:?} with {ops:?}");
        assert_eq!(report.applied, ops.len());
    }
}
