//! Reasoning services: where edit plans come from.
//!
//! A session hands the current document and its instruction to a
//! [`ReasoningService`] and gets back an [`EditPlan`]. The engine never
//! retries: a failure here is terminal for the session that asked.

mod chat;
mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ReasoningConfig, ReasoningProvider};
use crate::plan::EditPlan;

pub use chat::ChatCompletionsReasoner;
pub use scripted::ScriptedReasoner;

/// Failures talking to (or understanding) a reasoning backend.
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("reasoning request failed: {0}")]
    Transport(String),

    #[error("reasoning service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode reasoning response: {0}")]
    Decode(String),

    #[error("model returned no usable edits")]
    NoUsableEdits,
}

/// One instruction for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub instruction: String,
    /// `Section N` the session is scoped to, if any.
    pub section: Option<String>,
}

impl EditRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            section: None,
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Plan edits for `document`.
    async fn submit(&self, document: &str, request: &EditRequest) -> Result<EditPlan, ReasoningError>;

    fn name(&self) -> &str;
}

/// Build the service selected by `config`.
pub fn build_service(config: &ReasoningConfig) -> Arc<dyn ReasoningService> {
    match config.provider {
        ReasoningProvider::Scripted => Arc::new(ScriptedReasoner::new(config.latency())),
        ReasoningProvider::ChatCompletions => Arc::new(ChatCompletionsReasoner::from_config(config)),
    }
}
