//! Typed identifiers for agents, highlights, and peers.
//!
//! All ID types wrap UUIDv7 (time-ordered, globally unique) and display as
//! standard UUID text for logging. The `short()` form (first 8 hex chars) is
//! for human-facing UI, never a lookup key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An agent session identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(uuid::Uuid);

/// A highlight ledger record identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HighlightId(uuid::Uuid);

/// A presence peer identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters, for display only.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(AgentId, "AgentId");
impl_typed_id!(HighlightId, "HighlightId");
impl_typed_id!(PeerId, "PeerId");

impl PeerId {
    /// Low 64 bits of the id, used to derive stable per-peer numbers.
    pub fn low_bits(&self) -> u64 {
        let bytes = self.0.as_bytes();
        let mut low = [0u8; 8];
        low.copy_from_slice(&bytes[8..]);
        u64::from_be_bytes(low)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_unique() {
        let a = AgentId::new();
        let b = AgentId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_is_8_chars() {
        assert_eq!(HighlightId::new().short().len(), 8);
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = PeerId::new();
        let parsed = PeerId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = AgentId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_debug_uses_short_form() {
        let id = AgentId::new();
        assert_eq!(format!("{:?}", id), format!("AgentId({})", id.short()));
    }
}
