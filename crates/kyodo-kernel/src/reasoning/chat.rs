//! OpenAI-compatible `/chat/completions` planner.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{EditRequest, ReasoningError, ReasoningService};
use crate::config::ReasoningConfig;
use crate::plan::{EditPlan, parse_plan};

const SYSTEM_PROMPT: &str = "You are a helpful legal co-author. Return JSON: {operations:[{match, replacement}], summary?}. The match string must be copied from the existing document.";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    response_format: Value,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<MessageContent>,
}

/// Providers return either a plain string or a list of text parts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

impl MessageContent {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Parts(parts) => parts.into_iter().filter_map(|p| p.text).collect(),
        }
    }
}

/// Structured-output schema for `{operations:[{match,replacement}], summary?}`.
fn contract_edit_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "contract_edit",
            "schema": {
                "type": "object",
                "properties": {
                    "operations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "match": { "type": "string", "description": "Exact text from the contract to replace" },
                                "replacement": { "type": "string", "description": "New text to insert" }
                            },
                            "required": ["match", "replacement"],
                            "additionalProperties": false
                        }
                    },
                    "summary": { "type": "string" }
                },
                "required": ["operations"],
                "additionalProperties": false
            }
        }
    })
}

fn user_prompt(document: &str, request: &EditRequest) -> String {
    match &request.section {
        Some(section) => format!(
            "Document:\n{document}\n\nInstruction: {}\n\nOnly edit {section}.",
            request.instruction
        ),
        None => format!("Document:\n{document}\n\nInstruction: {}", request.instruction),
    }
}

/// Extract the first choice's text from a decoded response.
fn response_text(response: ChatResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(MessageContent::into_text)
}

pub struct ChatCompletionsReasoner {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl ChatCompletionsReasoner {
    pub fn from_config(config: &ReasoningConfig) -> Self {
        let api_key = config.resolve_api_key();
        if api_key.is_none() {
            warn!(base_url = %config.base_url, "no API key configured for chat completions");
        }
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        }
    }

    fn build_request(&self, document: &str, request: &EditRequest) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            temperature: self.temperature,
            response_format: contract_edit_format(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(document, request),
                },
            ],
        }
    }
}

#[async_trait]
impl ReasoningService for ChatCompletionsReasoner {
    async fn submit(&self, document: &str, request: &EditRequest) -> Result<EditPlan, ReasoningError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&self.build_request(document, request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ReasoningError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let decoded: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::Decode(e.to_string()))?;

        let content = response_text(decoded).unwrap_or_default();
        debug!(model = %self.model, chars = content.chars().count(), "chat completion received");
        parse_plan(&content)
    }

    fn name(&self) -> &str {
        "chat-completions"
    }
}
