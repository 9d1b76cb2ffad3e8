//! Shared identity and presentation types for Kyodo.
//!
//! This crate is the leaf of the workspace: typed IDs, agent colors, peer
//! aliases, character ranges, and the agent session status vocabulary. It has
//! **no internal kyodo dependencies**.
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`AgentId`]       | One agent session (cursor key, ledger owner) |
//! | [`HighlightId`]   | One highlight ledger record                  |
//! | [`PeerId`]        | One replica in the presence channel          |
//! | [`Color`]         | `#rrggbb` cursor / highlight color           |
//! | [`PeerAlias`]     | Human-facing `User N` label for a peer       |
//! | [`TextRange`]     | Half-open char range `[start, end)`          |
//! | [`SessionStatus`] | `idle → working → {done, error}`             |
//! |-------------------|----------------------------------------------|

pub mod color;
pub mod ids;
pub mod range;
pub mod session;

pub use color::{Color, ColorError, PeerAlias};
pub use ids::{AgentId, HighlightId, PeerId};
pub use range::TextRange;
pub use session::{DisplayMeta, SessionStatus};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
