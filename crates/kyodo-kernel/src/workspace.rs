//! Everything a session edits against, bundled.

use std::sync::Arc;

use kyodo_crdt::{SharedBuffer, SharedPresence};

use crate::config::EngineConfig;
use crate::guard::{ApprovalHook, ConflictGuard};
use crate::ledger::HighlightLedger;
use crate::version::VersionClock;
use crate::view::SharedView;

/// One peer's handles on the shared document.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct Workspace {
    pub buffer: SharedBuffer,
    pub presence: SharedPresence,
    pub view: SharedView,
    pub guard: Arc<ConflictGuard>,
    pub ledger: Arc<HighlightLedger>,
    pub clock: VersionClock,
    pub config: Arc<EngineConfig>,
}

impl Workspace {
    pub fn new(
        buffer: SharedBuffer,
        presence: SharedPresence,
        view: SharedView,
        approver: Arc<dyn ApprovalHook>,
        config: EngineConfig,
    ) -> Self {
        Self {
            buffer,
            presence,
            view,
            guard: Arc::new(ConflictGuard::new(config.conflict_policy, approver)),
            ledger: Arc::new(HighlightLedger::new(config.snippet_len)),
            clock: VersionClock::new(),
            config: Arc::new(config),
        }
    }
}
