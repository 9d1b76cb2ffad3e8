//! Agent session status vocabulary and display metadata.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::Color;

/// Lifecycle of one agent session.
///
/// `Idle → Working → {Done, Error}`. Terminal states never transition again;
/// a new instruction always spawns a new session.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Working,
    Done,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether `self → next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Working) | (Self::Working, Self::Done) | (Self::Working, Self::Error)
        )
    }
}

/// How an agent presents itself to humans: cursor label, color, role badge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMeta {
    pub display_name: String,
    pub color: Color,
    pub role: String,
}

impl DisplayMeta {
    pub fn new(display_name: impl Into<String>, color: Color, role: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            color,
            role: role.into(),
        }
    }
}
