//! Cursor colors and peer aliases.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::PeerId;

/// Error parsing a `#rrggbb` color.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color '{0}': expected #rrggbb")]
pub struct ColorError(pub String);

/// An sRGB color, serialized as `#rrggbb`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Violet used for agent cursors when no owner color is usable.
    pub const AGENT_FALLBACK: Color = Color::rgb(0x8b, 0x5c, 0xf6);

    /// How much lighter an agent's shade is than its owner's color.
    pub const AGENT_SHADE: u8 = 35;

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` (case-insensitive).
    pub fn parse(s: &str) -> Result<Self, ColorError> {
        let hex = s
            .strip_prefix('#')
            .filter(|h| h.len() == 6 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| ColorError(s.to_string()))?;
        let value = u32::from_str_radix(hex, 16).map_err(|_| ColorError(s.to_string()))?;
        Ok(Self::rgb(
            ((value >> 16) & 0xff) as u8,
            ((value >> 8) & 0xff) as u8,
            (value & 0xff) as u8,
        ))
    }

    /// Lighten every channel by `offset`, saturating at 255.
    ///
    /// Agents acting for a human get a lighter shade of that human's color so
    /// their cursors read as related but distinct.
    pub fn derive_agent(self, offset: u8) -> Self {
        Self::rgb(
            self.r.saturating_add(offset),
            self.g.saturating_add(offset),
            self.b.saturating_add(offset),
        )
    }

    /// Like [`Color::derive_agent`], starting from an unparsed string.
    ///
    /// Falls back to [`Color::AGENT_FALLBACK`] when `s` is not `#rrggbb`.
    pub fn derive_agent_from(s: &str, offset: u8) -> Self {
        Self::parse(s)
            .map(|c| c.derive_agent(offset))
            .unwrap_or(Self::AGENT_FALLBACK)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::AGENT_FALLBACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Color({})", self)
    }
}

impl FromStr for Color {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Color> for String {
    fn from(c: Color) -> String {
        c.to_string()
    }
}

/// Human-facing label for a peer: `User N`, `N` in `1..=9000`.
///
/// Stable for a given peer id, so every replica renders the same label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerAlias {
    pub number: u32,
}

impl PeerAlias {
    pub fn from_peer(peer: PeerId) -> Self {
        Self {
            number: (peer.low_bits() % 9000) as u32 + 1,
        }
    }
}

impl fmt::Display for PeerAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User {}", self.number)
    }
}
