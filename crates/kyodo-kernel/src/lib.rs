//! Kyodo kernel: the concurrent patch application engine.
//!
//! Humans and LLM agents edit one replicated text buffer at the same time.
//! The kernel turns an agent's high-level intent (a find/replace list or a
//! whole rewritten document) into a paced stream of small transactions that
//! stay correct no matter what anyone else does to the buffer in between.
//!
//! # Layout
//!
//! - [`anchors`], [`locate`], [`diff`]: position primitives
//! - [`player`]: executes plans against the buffer
//! - [`guard`]: asks before touching text a human is working on
//! - [`session`], [`orchestrator`]: agent lifecycle and fan-out
//! - [`cursor`], [`ledger`], [`history`]: what other people see
//! - [`reasoning`], [`plan`]: where plans come from
//! - [`view`], [`workspace`], [`config`], [`version`]: plumbing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kyodo_crdt::{MemoryBuffer, PresenceHub};
//! use kyodo_kernel::{EngineConfig, MemoryView, Orchestrator, StaticApprover, Workspace, build_service};
//! use kyodo_types::PeerId;
//!
//! # async fn demo() {
//! let buffer = Arc::new(MemoryBuffer::new("Tenant shall pay [INSERT_SALARY]."));
//! let presence = Arc::new(PresenceHub::new().join(PeerId::new()));
//! let view = Arc::new(MemoryView::new(buffer.clone()));
//! let config = EngineConfig::default();
//! let reasoner = build_service(&config.reasoning);
//! let workspace = Workspace::new(buffer, presence, view, Arc::new(StaticApprover(true)), config);
//!
//! let orchestrator = Orchestrator::new(workspace, reasoner);
//! orchestrator.dispatch("Set the salary").unwrap();
//! orchestrator.join_all().await;
//! # }
//! ```

pub mod anchors;
pub mod config;
pub mod cursor;
pub mod diff;
pub mod guard;
pub mod history;
pub mod ledger;
pub mod locate;
pub mod orchestrator;
pub mod plan;
pub mod player;
pub mod reasoning;
pub mod session;
pub mod version;
pub mod view;
pub mod workspace;

pub use anchors::{AnchorService, Gone};
pub use config::{ConfigError, ConflictPolicy, EngineConfig, ReasoningConfig, ReasoningProvider};
pub use cursor::{CursorBroadcast, CursorBroadcaster, CursorOverlay};
pub use diff::{AnchoredStep, DiffScript, DiffStep, OffsetMap};
pub use guard::{
    Admission, ApprovalHook, ApprovalRequest, ChannelApprover, ConflictGuard, PendingApproval, StaticApprover,
};
pub use history::{EditHistory, HistoryEntry, HistoryKind};
pub use ledger::{
    FocusOutcome, HIGHLIGHT_FIELD_PREFIX, HighlightDraft, HighlightLedger, HighlightRecord, LedgerEvent, highlight_field,
};
pub use locate::{NotFound, locate};
pub use orchestrator::{Orchestrator, PALETTE, parse_sections};
pub use plan::{EditOperation, EditPlan, parse_plan};
pub use player::{EditActor, OpOutcome, PatchPlayer, PlayError, PlayObserver, PlayReport, StepGate, TracingObserver};
pub use reasoning::{
    ChatCompletionsReasoner, EditRequest, ReasoningError, ReasoningService, ScriptedReasoner, build_service,
};
pub use session::{AgentSession, LogEntry, SessionError, SessionEvent, SessionHandle, SessionRegistry};
pub use version::{VersionClock, VersionTicket};
pub use view::{Bounds, MemoryView, SharedView, TextView};
pub use workspace::Workspace;
