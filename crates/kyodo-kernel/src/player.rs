//! Patch player: stream an edit plan into the shared buffer.
//!
//! The player is where everything meets. For each operation it locates the
//! target in the *current* text, asks the conflict guard, deletes the old
//! span in one transaction, then types the replacement one char at a time
//! with a live cursor, and finally records a highlight.
//!
//! Positions are never carried across an await as integers. Each char is
//! written through an insertion point bound right after the replaced span,
//! so text typed by anyone else while the agent is mid-word stays intact
//! and in place, and the point outlives deletion of its neighbours.
//!
//! Before every operation and every char the session's [`StepGate`] is
//! polled; a bumped document version or a cancelled token stops the run.

use std::time::Duration;

use kyodo_crdt::{Anchor, Origin};
use kyodo_types::{AgentId, DisplayMeta, TextRange};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::anchors::AnchorService;
use crate::cursor::{CursorBroadcast, CursorBroadcaster};
use crate::diff::{AnchoredStep, DiffScript};
use crate::guard::{Admission, ApprovalRequest};
use crate::ledger::HighlightDraft;
use crate::locate::locate;
use crate::plan::EditOperation;
use crate::version::VersionTicket;
use crate::workspace::Workspace;

/// Annotation kind applied to freshly written spans.
pub const HIGHLIGHT_ANNOTATION: &str = "highlight";

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PlayError {
    #[error("document changed, run aborted")]
    Stale,
    #[error("session cancelled")]
    Cancelled,
}

/// Polled before every step.
#[derive(Debug, Clone)]
pub struct StepGate {
    ticket: VersionTicket,
    cancel: CancellationToken,
}

impl StepGate {
    pub fn new(ticket: VersionTicket, cancel: CancellationToken) -> Self {
        Self { ticket, cancel }
    }

    pub fn check(&self) -> Result<(), PlayError> {
        if self.cancel.is_cancelled() {
            return Err(PlayError::Cancelled);
        }
        if !self.ticket.is_current() {
            return Err(PlayError::Stale);
        }
        Ok(())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Who is editing, as shown to humans.
#[derive(Debug, Clone)]
pub struct EditActor {
    pub agent_id: AgentId,
    pub display: DisplayMeta,
    pub section: String,
    /// Why the edit is being made; carried into highlight records.
    pub reason: String,
}

/// Receives per-step feedback.
pub trait PlayObserver: Send + Sync {
    fn on_progress(&self, done: usize, total: usize);
    fn on_log(&self, message: &str);
}

/// Observer that only traces.
pub struct TracingObserver;

impl PlayObserver for TracingObserver {
    fn on_progress(&self, done: usize, total: usize) {
        debug!(done, total, "play progress");
    }

    fn on_log(&self, message: &str) {
        info!("{message}");
    }
}

/// Result of one operation or diff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    Applied { inserted: usize },
    NotFound,
    Rejected,
    /// The write target vanished; `inserted` chars landed before it did.
    Gone { inserted: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayReport {
    pub applied: usize,
    pub not_found: usize,
    pub gone: usize,
    pub rejected: usize,
    pub inserted_chars: usize,
    pub aborted: Option<PlayError>,
}

impl PlayReport {
    fn tally(&mut self, outcome: OpOutcome) {
        match outcome {
            OpOutcome::Applied { inserted } => {
                self.applied += 1;
                self.inserted_chars += inserted;
            }
            OpOutcome::NotFound => self.not_found += 1,
            OpOutcome::Rejected => self.rejected += 1,
            OpOutcome::Gone { inserted } => {
                self.gone += 1;
                self.inserted_chars += inserted;
            }
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} applied, {} not found, {} gone, {} rejected",
            self.applied, self.not_found, self.gone, self.rejected
        )
    }
}

/// Chars inserted by one paced write.
struct Written {
    first: Option<Anchor>,
    text: String,
    complete: bool,
}

fn preview(text: &str) -> String {
    const MAX: usize = 40;
    if text.chars().count() > MAX {
        format!("{}…", text.chars().take(MAX).collect::<String>())
    } else {
        text.to_string()
    }
}

fn char_slice(text: &str, range: TextRange) -> String {
    text.chars().skip(range.start).take(range.len()).collect()
}

/// Plays plans for one session.
pub struct PatchPlayer<'a> {
    workspace: &'a Workspace,
    actor: EditActor,
    gate: StepGate,
    observer: &'a dyn PlayObserver,
    anchors: AnchorService,
    cursors: CursorBroadcaster,
    origin: Origin,
    pacing: Duration,
}

impl<'a> PatchPlayer<'a> {
    pub fn new(workspace: &'a Workspace, actor: EditActor, gate: StepGate, observer: &'a dyn PlayObserver) -> Self {
        Self {
            anchors: AnchorService::new(workspace.buffer.clone()),
            cursors: CursorBroadcaster::new(workspace.presence.clone()),
            origin: Origin::agent(&actor.agent_id),
            pacing: workspace.config.pacing(),
            workspace,
            actor,
            gate,
            observer,
        }
    }

    /// Apply find/replace operations in order.
    pub async fn play_operations(&self, operations: &[EditOperation]) -> PlayReport {
        let mut report = PlayReport::default();
        let total = operations.len();
        for (index, op) in operations.iter().enumerate() {
            let outcome = match self.gate.check() {
                Ok(()) => self.apply_operation(op).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(outcome) => report.tally(outcome),
                Err(e) => {
                    info!(agent = %self.actor.agent_id, "run stopped: {e}");
                    report.aborted = Some(e);
                    break;
                }
            }
            self.observer.on_progress(index + 1, total);
        }
        self.cursors.retract(&self.actor.agent_id);
        report
    }

    /// Reconcile the buffer from `old` to `new` through a diff script.
    pub async fn play_rewrite(&self, old: &str, new: &str) -> PlayReport {
        let mut report = PlayReport::default();
        let script = DiffScript::compute(old, new);
        if script.is_identity() {
            self.observer.on_log("Rewrite is identical to the document; nothing to do.");
            return report;
        }

        let steps = script.anchor(old, self.workspace.buffer.as_ref());
        let total = steps.len();
        let mut head = self.anchors.create_insertion_point(0);
        for (index, step) in steps.iter().enumerate() {
            let outcome = match self.gate.check() {
                Ok(()) => self.apply_step(step, &mut head).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(Some(outcome)) => report.tally(outcome),
                Ok(None) => {}
                Err(e) => {
                    info!(agent = %self.actor.agent_id, "run stopped: {e}");
                    report.aborted = Some(e);
                    break;
                }
            }
            self.observer.on_progress(index + 1, total);
        }
        self.cursors.retract(&self.actor.agent_id);
        report
    }

    async fn apply_operation(&self, op: &EditOperation) -> Result<OpOutcome, PlayError> {
        let buffer = &self.workspace.buffer;
        let Ok(mut range) = locate(&buffer.full_text(), &op.match_text) else {
            return Ok(self.not_found(&op.match_text));
        };

        match self.admit(range, &op.match_text, &op.replacement).await? {
            Admission::Rejected => return Ok(self.rejected(&op.match_text)),
            Admission::Approved => {
                // The human had time to type; look again.
                self.gate.check()?;
                match locate(&buffer.full_text(), &op.match_text) {
                    Ok(fresh) => range = fresh,
                    Err(_) => return Ok(self.not_found(&op.match_text)),
                }
            }
            Admission::Clear => {}
        }

        debug!(agent = %self.actor.agent_id, start = range.start, end = range.end, "replacing span");
        // Bound while the span is still there: right after its last char.
        let point = self.anchors.create_insertion_point(range.end);
        if !range.is_empty() {
            self.publish_cursor(&self.anchors.create(range.start), range.len());
            if let Err(e) = buffer.delete(range.start, range.len(), Some(self.origin.clone())) {
                warn!(agent = %self.actor.agent_id, "delete failed: {e}");
                return Ok(OpOutcome::Gone { inserted: 0 });
            }
        }

        let written = self.type_text(&point, &op.replacement).await?;
        Ok(self.finish_write(written))
    }

    /// Returns `None` for steps that don't mutate.
    async fn apply_step(&self, step: &AnchoredStep, head: &mut Anchor) -> Result<Option<OpOutcome>, PlayError> {
        let buffer = &self.workspace.buffer;
        match step {
            AnchoredStep::Retain { to } => {
                *head = *to;
                Ok(None)
            }
            AnchoredStep::Delete { from, until, expected } => {
                *head = *until;
                let (Some(start), Some(end)) = (self.anchors.resolve(from).ok(), self.anchors.resolve(until).ok()) else {
                    warn!(agent = %self.actor.agent_id, "diff delete target vanished");
                    return Ok(Some(OpOutcome::Gone { inserted: 0 }));
                };
                if end <= start {
                    // Someone else already removed it.
                    return Ok(None);
                }
                let range = TextRange::new(start, end);
                if char_slice(&buffer.full_text(), range) != *expected {
                    warn!(agent = %self.actor.agent_id, "diff delete region changed concurrently, leaving it");
                    return Ok(Some(OpOutcome::Gone { inserted: 0 }));
                }
                let range = match self.admit(range, expected, "").await? {
                    Admission::Rejected => return Ok(Some(self.rejected(expected))),
                    Admission::Approved => {
                        self.gate.check()?;
                        match (self.anchors.resolve(from).ok(), self.anchors.resolve(until).ok()) {
                            (Some(s), Some(e)) if e > s => TextRange::new(s, e),
                            _ => return Ok(Some(OpOutcome::Gone { inserted: 0 })),
                        }
                    }
                    Admission::Clear => range,
                };
                self.publish_cursor(from, range.len());
                match buffer.delete(range.start, range.len(), Some(self.origin.clone())) {
                    Ok(()) => Ok(Some(OpOutcome::Applied { inserted: 0 })),
                    Err(e) => {
                        warn!(agent = %self.actor.agent_id, "delete failed: {e}");
                        Ok(Some(OpOutcome::Gone { inserted: 0 }))
                    }
                }
            }
            AnchoredStep::Insert { text } => {
                let Some(at) = self.anchors.resolve(head).ok() else {
                    warn!(agent = %self.actor.agent_id, "diff insert position vanished");
                    return Ok(Some(OpOutcome::Gone { inserted: 0 }));
                };
                if self.admit(TextRange::caret(at), "", text).await? == Admission::Rejected {
                    return Ok(Some(self.rejected(text)));
                }
                let written = self.type_text(head, text).await?;
                Ok(Some(self.finish_write(written)))
            }
        }
    }

    /// Ask the guard, giving up if the session is cancelled while waiting.
    async fn admit(&self, range: TextRange, current: &str, replacement: &str) -> Result<Admission, PlayError> {
        let request = ApprovalRequest {
            agent_id: self.actor.agent_id,
            display_name: self.actor.display.display_name.clone(),
            range,
            current: current.to_string(),
            replacement: replacement.to_string(),
        };
        let selection = self.workspace.view.selection();
        tokio::select! {
            admission = self.workspace.guard.admit(request, selection) => Ok(admission),
            _ = self.gate.cancel_token().cancelled() => Err(PlayError::Cancelled),
        }
    }

    async fn pace(&self) {
        if self.pacing.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.pacing).await;
        }
    }

    /// Type `text` at `point`, one char per step.
    async fn type_text(&self, point: &Anchor, text: &str) -> Result<Written, PlayError> {
        let buffer = &self.workspace.buffer;
        let mut written = Written {
            first: None,
            text: String::with_capacity(text.len()),
            complete: true,
        };
        let mut unit = [0u8; 4];
        for ch in text.chars() {
            self.pace().await;
            self.gate.check()?;
            let at = match buffer.insert_at(point, ch.encode_utf8(&mut unit), Some(self.origin.clone())) {
                Ok(at) => at,
                Err(e) => {
                    warn!(agent = %self.actor.agent_id, "insert failed: {e}");
                    written.complete = false;
                    break;
                }
            };
            let typed = self.anchors.create(at);
            written.first.get_or_insert(typed);
            written.text.push(ch);
            self.publish_cursor(&typed, 1);
        }
        Ok(written)
    }

    /// Show the span about to be replaced, or the char just typed.
    fn publish_cursor(&self, at: &Anchor, length: usize) {
        self.cursors.publish(
            &self.actor.agent_id,
            &CursorBroadcast {
                anchor: *at,
                length,
                display_name: Some(self.actor.display.display_name.clone()),
                color: self.actor.display.color,
            },
        );
    }

    /// Record and annotate what was written, and classify the outcome.
    fn finish_write(&self, written: Written) -> OpOutcome {
        let inserted = written.text.chars().count();
        if let Some(anchor) = written.first {
            let record = self.workspace.ledger.record(HighlightDraft {
                owner: self.actor.agent_id,
                anchor,
                color: self.actor.display.color,
                section: self.actor.section.clone(),
                reason: self.actor.reason.clone(),
                text: written.text,
            });
            let buffer = &self.workspace.buffer;
            if let Some(start) = self.anchors.resolve(&record.anchor).ok() {
                self.workspace.view.apply_annotation(
                    TextRange::at(start, record.length).clamp_to(buffer.len()),
                    HIGHLIGHT_ANNOTATION,
                    json!({
                        "id": record.id,
                        "agent": record.owner,
                        "color": record.color,
                    }),
                );
            }
        }
        if written.complete {
            OpOutcome::Applied { inserted }
        } else {
            warn!(agent = %self.actor.agent_id, inserted, "write target vanished mid-operation");
            self.observer
                .on_log(&format!("Edit target vanished; stopped after {inserted} characters."));
            OpOutcome::Gone { inserted }
        }
    }

    fn not_found(&self, match_text: &str) -> OpOutcome {
        warn!(agent = %self.actor.agent_id, "match not found, skipping");
        self.observer
            .on_log(&format!("Could not find \"{}\"; skipped.", preview(match_text)));
        OpOutcome::NotFound
    }

    fn rejected(&self, match_text: &str) -> OpOutcome {
        info!(agent = %self.actor.agent_id, "edit rejected by user");
        self.observer
            .on_log(&format!("Edit near \"{}\" rejected; skipped.", preview(match_text)));
        OpOutcome::Rejected
    }
}
