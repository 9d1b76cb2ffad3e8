//! Orchestrator: turn instructions into running agent sessions.
//!
//! Each session is one tokio task: snapshot the document, ask the reasoning
//! service for a plan, play it, and land in a terminal state. Sessions
//! never wait on one another; the buffer's merge rule is the only arbiter
//! between them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use futures::future::join_all;
use kyodo_crdt::{Edit, Origin};
use kyodo_types::{AgentId, Color, DisplayMeta};
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, info_span, warn};

use crate::plan::EditPlan;
use crate::player::{EditActor, PatchPlayer, PlayError, StepGate};
use crate::reasoning::{EditRequest, ReasoningError, ReasoningService};
use crate::session::{SessionError, SessionHandle, SessionRegistry};
use crate::workspace::Workspace;

/// Agent colors, handed out round-robin.
pub const PALETTE: [Color; 6] = [
    Color::rgb(0x8b, 0x5c, 0xf6),
    Color::rgb(0x25, 0x63, 0xeb),
    Color::rgb(0xdb, 0x27, 0x77),
    Color::rgb(0xca, 0x8a, 0x04),
    Color::rgb(0x16, 0xa3, 0x4a),
    Color::rgb(0x08, 0x91, 0xb2),
];

/// Section label for sessions scoped to the whole document.
pub const WHOLE_DOCUMENT: &str = "Document";

/// Transaction origin for whole-document replacement.
pub const DOCUMENT_SWITCH_ORIGIN: &str = "document-switch";

/// Distinct `Section N` references, in order of first mention.
pub fn parse_sections(instruction: &str) -> Vec<String> {
    let Ok(pattern) = Regex::new(r"(?i)\bsection\s+(\d+)") else {
        return Vec::new();
    };
    let mut sections: Vec<String> = Vec::new();
    for caps in pattern.captures_iter(instruction) {
        let label = format!("Section {}", &caps[1]);
        if !sections.contains(&label) {
            sections.push(label);
        }
    }
    sections
}

fn abort_reason(e: PlayError) -> &'static str {
    match e {
        PlayError::Stale => "document changed",
        PlayError::Cancelled => "cancelled",
    }
}

pub struct Orchestrator {
    workspace: Workspace,
    registry: Arc<SessionRegistry>,
    reasoner: Arc<dyn ReasoningService>,
    tasks: DashMap<AgentId, JoinHandle<()>>,
    next_color: AtomicUsize,
}

impl Orchestrator {
    pub fn new(workspace: Workspace, reasoner: Arc<dyn ReasoningService>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::with_retention(workspace.config.session_retention)),
            reasoner,
            tasks: DashMap::new(),
            next_color: AtomicUsize::new(0),
            workspace,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Color for the next session: a lighter shade of the owner's color
    /// when one is configured, else the next palette entry.
    pub fn next_color(&self) -> Color {
        match &self.workspace.config.owner_color {
            Some(owner) => Color::derive_agent_from(owner, Color::AGENT_SHADE),
            None => PALETTE[self.next_color.fetch_add(1, Ordering::Relaxed) % PALETTE.len()],
        }
    }

    fn display_for(&self, section: Option<&str>) -> DisplayMeta {
        match section {
            Some(section) => DisplayMeta::new(format!("{section} Agent"), self.next_color(), "Section Editor"),
            None => DisplayMeta::new("Drafting Agent", self.next_color(), "Drafter"),
        }
    }

    /// Start exactly one session.
    pub fn spawn(
        &self,
        instruction: &str,
        section: Option<&str>,
        display: DisplayMeta,
    ) -> Result<AgentId, SessionError> {
        self.reap();
        let label = section.unwrap_or(WHOLE_DOCUMENT).to_string();
        let ticket = self.workspace.clock.ticket();
        let id = self
            .registry
            .create(display.clone(), instruction, &label, ticket.captured());
        self.registry.begin(&id)?;
        let cancel = self.registry.cancel_token(&id).ok_or(SessionError::NotFound(id))?;

        let mut request = EditRequest::new(instruction);
        if let Some(section) = section {
            request = request.with_section(section);
        }
        let actor = EditActor {
            agent_id: id,
            display,
            section: label.clone(),
            reason: instruction.to_string(),
        };
        let task = SessionTask {
            workspace: self.workspace.clone(),
            registry: self.registry.clone(),
            reasoner: self.reasoner.clone(),
            request,
            actor,
            gate: StepGate::new(ticket, cancel),
        };

        let span = info_span!("agent_session", agent = %id, section = %label);
        let handle = tokio::spawn(task.run().instrument(span));
        self.tasks.insert(id, handle);
        Ok(id)
    }

    /// Split `instruction` into one session per `Section N` it names, or a
    /// single whole-document session.
    pub fn dispatch(&self, instruction: &str) -> Result<Vec<AgentId>, SessionError> {
        let sections = parse_sections(instruction);
        if sections.is_empty() {
            let display = self.display_for(None);
            return Ok(vec![self.spawn(instruction, None, display)?]);
        }
        info!(count = sections.len(), "dispatching per-section sessions");
        sections
            .iter()
            .map(|section| {
                let display = self.display_for(Some(section));
                self.spawn(instruction, Some(section), display)
            })
            .collect()
    }

    /// Wait for one session's task. Unknown or already-joined ids return
    /// immediately.
    pub async fn join(&self, id: &AgentId) {
        let Some((_, handle)) = self.tasks.remove(id) else {
            return;
        };
        if let Err(e) = handle.await {
            warn!(agent = %id, "session task ended abnormally: {e}");
        }
    }

    /// Forget handles of tasks that already finished without being joined.
    pub fn reap(&self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, handle| !handle.is_finished());
        before - self.tasks.len()
    }

    /// Sessions whose task is still held: running, or finished and not yet
    /// joined or reaped.
    pub fn tracked_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub async fn join_all(&self) {
        let ids: Vec<AgentId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        join_all(ids.iter().map(|id| self.join(id))).await;
    }

    pub fn cancel(&self, id: &AgentId) -> bool {
        self.registry.cancel(id)
    }

    /// Replace the whole document and invalidate every running session.
    pub fn switch_document(&self, text: &str) -> kyodo_crdt::Result<u64> {
        let version = self.workspace.clock.bump();
        let buffer = &self.workspace.buffer;
        let mut edits = Vec::with_capacity(2);
        let len = buffer.len();
        if len > 0 {
            edits.push(Edit::delete(0, len));
        }
        if !text.is_empty() {
            edits.push(Edit::insert(0, text));
        }
        buffer.transact(Some(Origin::new(DOCUMENT_SWITCH_ORIGIN)), &edits)?;
        info!(version, "document switched");
        Ok(version)
    }

    /// Fill an empty buffer. Returns false if it already had content.
    pub fn seed(&self, text: &str) -> kyodo_crdt::Result<bool> {
        let buffer = &self.workspace.buffer;
        if !buffer.is_empty() {
            return Ok(false);
        }
        buffer.insert(0, text, None)?;
        Ok(true)
    }
}

/// Everything one session's task owns.
struct SessionTask {
    workspace: Workspace,
    registry: Arc<SessionRegistry>,
    reasoner: Arc<dyn ReasoningService>,
    request: EditRequest,
    actor: EditActor,
    gate: StepGate,
}

impl SessionTask {
    async fn run(self) {
        let id = self.actor.agent_id;
        let outcome = self.execute().await;
        let result = match outcome {
            Ok(None) => self.registry.complete(&id),
            Ok(Some(stopped)) => self.registry.abort(&id, abort_reason(stopped)),
            Err(e) => self.registry.fail(&id, &e.to_string()),
        };
        if let Err(e) = result {
            warn!(agent = %id, "could not finish session: {e}");
        }
    }

    /// `Ok(Some(_))` when the run stopped early without failing.
    async fn execute(&self) -> Result<Option<PlayError>, ReasoningError> {
        let id = self.actor.agent_id;
        let document = self.workspace.buffer.full_text();

        let plan = tokio::select! {
            plan = self.reasoner.submit(&document, &self.request) => plan?,
            _ = self.gate.cancel_token().cancelled() => return Ok(Some(PlayError::Cancelled)),
        };
        if let Err(stopped) = self.gate.check() {
            return Ok(Some(stopped));
        }

        let handle = SessionHandle::new(self.registry.clone(), id);
        let player = PatchPlayer::new(&self.workspace, self.actor.clone(), self.gate.clone(), &handle);
        let report = match plan {
            EditPlan::Operations {
                operations,
                summary,
                malformed,
            } => {
                if malformed > 0 {
                    self.registry
                        .log(&id, format!("Ignored {malformed} malformed operation(s)."));
                }
                if operations.is_empty() {
                    if malformed > 0 {
                        return Err(ReasoningError::NoUsableEdits);
                    }
                    self.registry.log(&id, "No edits proposed.");
                }
                if let Some(summary) = summary {
                    self.registry.log(&id, summary);
                }
                player.play_operations(&operations).await
            }
            EditPlan::Rewrite { text } => {
                self.registry.log(&id, "Applying full rewrite.");
                player.play_rewrite(&document, &text).await
            }
        };

        self.registry.log(&id, report.summary());
        Ok(report.aborted)
    }
}
