//! Agent sessions: one unit of concurrent editing work.
//!
//! A session is created `idle`, goes `working` as soon as its task starts,
//! and ends `done` or `error`. Terminal sessions never move again.
//!
//! The registry owns every session's state and fans changes out over a
//! broadcast channel so hosts can render progress and logs without
//! polling. It keeps a bounded number of finished sessions around for
//! display; past that the oldest are evicted.

use std::sync::Arc;

use dashmap::DashMap;
use kyodo_types::{AgentId, DisplayMeta, SessionStatus, now_millis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::player::PlayObserver;

const EVENT_CAPACITY: usize = 1024;

/// Finished sessions kept by [`SessionRegistry::new`].
pub const DEFAULT_RETENTION: usize = 64;

/// Progress never reaches this until the session is terminal.
const WORKING_PROGRESS_CAP: u8 = 99;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(AgentId),

    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: u64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: AgentId,
    pub display: DisplayMeta,
    /// The instruction this session is carrying out.
    pub purpose: String,
    pub section: String,
    pub status: SessionStatus,
    pub progress: u8,
    pub log: Vec<LogEntry>,
    /// Document version the session was created under.
    pub owner_version: u64,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created { id: AgentId },
    Progress { id: AgentId, progress: u8 },
    Log { id: AgentId, message: String },
    Terminal { id: AgentId, status: SessionStatus },
    /// A finished session was dropped from the registry.
    Evicted { id: AgentId },
    /// Global, user-facing failure notice.
    Notice { message: String },
}

struct Slot {
    session: AgentSession,
    cancel: CancellationToken,
}

pub struct SessionRegistry {
    sessions: DashMap<AgentId, Slot>,
    events: broadcast::Sender<SessionEvent>,
    /// Max terminal sessions kept.
    retention: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sessions: DashMap::new(),
            events,
            retention,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn create(&self, display: DisplayMeta, purpose: &str, section: &str, owner_version: u64) -> AgentId {
        let id = AgentId::new();
        let session = AgentSession {
            id,
            display,
            purpose: purpose.to_string(),
            section: section.to_string(),
            status: SessionStatus::Idle,
            progress: 0,
            log: Vec::new(),
            owner_version,
            created_at: now_millis(),
        };
        self.sessions.insert(
            id,
            Slot {
                session,
                cancel: CancellationToken::new(),
            },
        );
        self.emit(SessionEvent::Created { id });
        id
    }

    pub fn get(&self, id: &AgentId) -> Option<AgentSession> {
        self.sessions.get(id).map(|slot| slot.session.clone())
    }

    /// Every session, oldest first.
    pub fn list(&self) -> Vec<AgentSession> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|slot| slot.session.clone()).collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Drop a finished session. Running or unknown sessions stay put and
    /// return false.
    pub fn evict(&self, id: &AgentId) -> bool {
        let removed = self
            .sessions
            .remove_if(id, |_, slot| slot.session.status.is_terminal())
            .is_some();
        if removed {
            debug!(agent = %id, "session evicted");
            self.emit(SessionEvent::Evicted { id: *id });
        }
        removed
    }

    /// Evict the oldest finished sessions beyond the retention limit.
    fn enforce_retention(&self) {
        let mut finished: Vec<AgentId> = self
            .sessions
            .iter()
            .filter(|slot| slot.session.status.is_terminal())
            .map(|slot| *slot.key())
            .collect();
        if finished.len() <= self.retention {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.retention;
        for id in &finished[..excess] {
            self.evict(id);
        }
    }

    pub fn cancel_token(&self, id: &AgentId) -> Option<CancellationToken> {
        self.sessions.get(id).map(|slot| slot.cancel.clone())
    }

    /// Request cooperative cancellation. Returns false for unknown ids.
    pub fn cancel(&self, id: &AgentId) -> bool {
        match self.sessions.get(id) {
            Some(slot) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn transition(&self, id: &AgentId, to: SessionStatus) -> Result<(), SessionError> {
        let mut slot = self.sessions.get_mut(id).ok_or(SessionError::NotFound(*id))?;
        let from = slot.session.status;
        if !from.can_transition_to(to) {
            return Err(SessionError::InvalidTransition { from, to });
        }
        slot.session.status = to;
        if to == SessionStatus::Done {
            slot.session.progress = 100;
        }
        Ok(())
    }

    pub fn log(&self, id: &AgentId, message: impl Into<String>) {
        let message = message.into();
        if let Some(mut slot) = self.sessions.get_mut(id) {
            slot.session.log.push(LogEntry {
                at: now_millis(),
                message: message.clone(),
            });
        } else {
            return;
        }
        self.emit(SessionEvent::Log { id: *id, message });
    }

    /// Advisory progress. Ignored unless working; never decreases.
    pub fn progress(&self, id: &AgentId, value: u8) {
        let value = value.min(WORKING_PROGRESS_CAP);
        {
            let Some(mut slot) = self.sessions.get_mut(id) else {
                return;
            };
            if slot.session.status != SessionStatus::Working || value <= slot.session.progress {
                return;
            }
            slot.session.progress = value;
        }
        self.emit(SessionEvent::Progress {
            id: *id,
            progress: value,
        });
    }

    /// `idle → working`.
    pub fn begin(&self, id: &AgentId) -> Result<(), SessionError> {
        self.transition(id, SessionStatus::Working)?;
        let purpose = self.get(id).map(|s| s.purpose).unwrap_or_default();
        info!(agent = %id, "session started");
        self.log(id, format!("Started task: {purpose}"));
        Ok(())
    }

    /// `working → done`, progress 100.
    pub fn complete(&self, id: &AgentId) -> Result<(), SessionError> {
        self.transition(id, SessionStatus::Done)?;
        info!(agent = %id, "session completed");
        self.log(id, "Task completed successfully.");
        self.emit(SessionEvent::Progress {
            id: *id,
            progress: 100,
        });
        self.emit(SessionEvent::Terminal {
            id: *id,
            status: SessionStatus::Done,
        });
        self.enforce_retention();
        Ok(())
    }

    /// `working → done` after the document changed under the session or it
    /// was cancelled. Not a failure: no notice is raised.
    pub fn abort(&self, id: &AgentId, reason: &str) -> Result<(), SessionError> {
        self.transition(id, SessionStatus::Done)?;
        info!(agent = %id, reason, "session aborted");
        self.log(id, format!("Aborted: {reason}"));
        self.emit(SessionEvent::Terminal {
            id: *id,
            status: SessionStatus::Done,
        });
        self.enforce_retention();
        Ok(())
    }

    /// `working → error`. Progress stays where it was.
    pub fn fail(&self, id: &AgentId, cause: &str) -> Result<(), SessionError> {
        self.transition(id, SessionStatus::Error)?;
        error!(agent = %id, cause, "session failed");
        self.log(id, format!("Error: {cause}"));
        self.emit(SessionEvent::Terminal {
            id: *id,
            status: SessionStatus::Error,
        });
        self.emit(SessionEvent::Notice {
            message: format!("Agent Error: {cause}"),
        });
        self.enforce_retention();
        Ok(())
    }
}

/// A registry bound to one session; what the player reports into.
#[derive(Clone)]
pub struct SessionHandle {
    registry: Arc<SessionRegistry>,
    id: AgentId,
}

impl SessionHandle {
    pub fn new(registry: Arc<SessionRegistry>, id: AgentId) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }
}

impl PlayObserver for SessionHandle {
    fn on_progress(&self, done: usize, total: usize) {
        if total > 0 {
            self.registry.progress(&self.id, ((done * 100) / total) as u8);
        }
    }

    fn on_log(&self, message: &str) {
        self.registry.log(&self.id, message);
    }
}
