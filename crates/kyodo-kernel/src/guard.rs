//! Conflict guard: don't type over a human without asking.
//!
//! Before an agent mutates `[start, end)` the guard compares that range
//! against the local human's live selection. A collision suspends the
//! operation until an [`ApprovalHook`] answers. Prompts from concurrent
//! sessions are serialized so a human only ever faces one at a time.

use std::sync::Arc;

use async_trait::async_trait;
use kyodo_types::{AgentId, TextRange};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info};

use crate::config::ConflictPolicy;

/// What the human is being asked to allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub agent_id: AgentId,
    pub display_name: String,
    /// Span about to be replaced.
    pub range: TextRange,
    /// Text currently in that span.
    pub current: String,
    /// Text that will replace it.
    pub replacement: String,
}

/// Host-provided human prompt.
#[async_trait]
pub trait ApprovalHook: Send + Sync {
    /// Resolve exactly once: `true` to proceed.
    async fn request_approval(&self, request: &ApprovalRequest) -> bool;
}

/// Answers every request the same way.
#[derive(Debug, Clone, Copy)]
pub struct StaticApprover(pub bool);

#[async_trait]
impl ApprovalHook for StaticApprover {
    async fn request_approval(&self, _request: &ApprovalRequest) -> bool {
        self.0
    }
}

/// A request waiting on a human.
#[derive(Debug)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    responder: oneshot::Sender<bool>,
}

impl PendingApproval {
    pub fn respond(self, approved: bool) {
        // The session may have been cancelled meanwhile.
        let _ = self.responder.send(approved);
    }

    pub fn approve(self) {
        self.respond(true)
    }

    pub fn reject(self) {
        self.respond(false)
    }
}

/// Bridges approvals to whatever drains the returned receiver. A request
/// that is dropped without an answer counts as rejected.
#[derive(Debug, Clone)]
pub struct ChannelApprover {
    tx: mpsc::Sender<PendingApproval>,
}

impl ChannelApprover {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PendingApproval>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApprovalHook for ChannelApprover {
    async fn request_approval(&self, request: &ApprovalRequest) -> bool {
        let (responder, answer) = oneshot::channel();
        let pending = PendingApproval {
            request: request.clone(),
            responder,
        };
        if self.tx.send(pending).await.is_err() {
            debug!("approval channel closed, rejecting");
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

/// Result of asking the guard for permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No human in the way.
    Clear,
    /// Conflict, and the human said yes.
    Approved,
    /// Conflict, and the human said no (or never answered).
    Rejected,
}

/// True if `range`, widened by `buffer` on each side, touches `selection`.
///
/// A caret (empty selection) inside the widened range counts.
pub fn within_proximity(range: TextRange, selection: TextRange, buffer: usize) -> bool {
    let b = buffer as i64;
    let lo = range.start as i64 - b;
    let hi = range.end as i64 + b;
    (selection.start as i64) < hi && (selection.end as i64) > lo
}

pub struct ConflictGuard {
    policy: ConflictPolicy,
    approver: Arc<dyn ApprovalHook>,
    turn: Mutex<()>,
}

impl ConflictGuard {
    pub fn new(policy: ConflictPolicy, approver: Arc<dyn ApprovalHook>) -> Self {
        Self {
            policy,
            approver,
            turn: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn conflicts(&self, range: TextRange, selection: Option<TextRange>) -> bool {
        let Some(selection) = selection else {
            return false;
        };
        match self.policy {
            ConflictPolicy::Proximity { buffer } => within_proximity(range, selection, buffer),
            ConflictPolicy::AnySelection => !selection.is_empty(),
        }
    }

    /// Gate one mutation. Suspends for as long as the human takes.
    pub async fn admit(&self, request: ApprovalRequest, selection: Option<TextRange>) -> Admission {
        if !self.conflicts(request.range, selection) {
            return Admission::Clear;
        }
        let _turn = self.turn.lock().await;
        info!(
            agent = %request.agent_id,
            start = request.range.start,
            end = request.range.end,
            "edit overlaps human selection, requesting approval"
        );
        if self.approver.request_approval(&request).await {
            Admission::Approved
        } else {
            Admission::Rejected
        }
    }
}
