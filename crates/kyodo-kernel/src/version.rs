//! Document version clock.
//!
//! Bumped whenever the shared document is swapped out from under running
//! sessions. A session captures a [`VersionTicket`] at spawn and checks it
//! before every step.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default)]
pub struct VersionClock(Arc<AtomicU64>);

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Advance the version, invalidating every outstanding ticket.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn ticket(&self) -> VersionTicket {
        VersionTicket {
            clock: self.clone(),
            captured: self.current(),
        }
    }
}

/// The version a session was created under.
#[derive(Debug, Clone)]
pub struct VersionTicket {
    clock: VersionClock,
    captured: u64,
}

impl VersionTicket {
    pub fn captured(&self) -> u64 {
        self.captured
    }

    pub fn is_current(&self) -> bool {
        self.clock.current() == self.captured
    }
}
