//! Engine configuration.
//!
//! Loaded from a RON file. Every field has a default, so a partial file (or
//! no file at all) is valid:
//!
//! ```ron
//! (
//!     pacing_ms: 10,
//!     conflict_policy: Proximity(buffer: 12),
//!     reasoning: (provider: ChatCompletions, model: "gpt-4o-mini"),
//! )
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },
}

/// How the conflict guard decides that an agent edit collides with a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Conflict iff the selection overlaps the mutation range widened by
    /// `buffer` units on both sides.
    Proximity { buffer: usize },
    /// Conflict iff any non-empty selection exists.
    AnySelection,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::Proximity {
            buffer: DEFAULT_PROXIMITY_BUFFER,
        }
    }
}

pub const DEFAULT_PROXIMITY_BUFFER: usize = 8;

/// Which reasoning service backs agent sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasoningProvider {
    /// Offline keyword-driven planner.
    #[default]
    #[serde(alias = "Mock")]
    Scripted,
    /// Any OpenAI-compatible `/chat/completions` endpoint.
    ChatCompletions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub provider: ReasoningProvider,
    pub base_url: String,
    pub model: String,

    /// API key (inline). Prefer `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    pub temperature: f32,

    /// Simulated round-trip for the scripted provider.
    pub latency_ms: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: ReasoningProvider::Scripted,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: None,
            temperature: 0.4,
            latency_ms: 800,
        }
    }
}

impl ReasoningConfig {
    /// Resolve API key from config or environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        if let Some(env_var) = &self.api_key_env {
            return std::env::var(env_var).ok();
        }
        std::env::var("OPENAI_API_KEY").ok()
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// Tunables for the patch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay before each inserted char.
    pub pacing_ms: u64,
    pub conflict_policy: ConflictPolicy,
    /// Quiet period before live cursors are re-rendered.
    pub cursor_debounce_ms: u64,
    /// Max chars kept in ledger and history snippets.
    pub snippet_len: usize,
    pub history_capacity: usize,
    /// The local human's cursor color (`#rrggbb`). When set, every agent
    /// started here wears a lighter shade of it instead of a palette color.
    pub owner_color: Option<String>,
    /// Finished sessions kept for display before the oldest are evicted.
    pub session_retention: usize,
    pub reasoning: ReasoningConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 25,
            conflict_policy: ConflictPolicy::default(),
            cursor_debounce_ms: 50,
            snippet_len: 120,
            history_capacity: 50,
            owner_color: None,
            session_retention: crate::session::DEFAULT_RETENTION,
            reasoning: ReasoningConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a RON file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        Self::from_ron(&content).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    pub fn from_ron(content: &str) -> Result<Self, String> {
        ron::from_str(content).map_err(|e| e.to_string())
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn cursor_debounce(&self) -> Duration {
        Duration::from_millis(self.cursor_debounce_ms)
    }
}
