//! Edit plans and their normalization from model output.
//!
//! Model output is loose: operations may name their fields `match` or
//! `target`, `replacement` or `content`, and the whole response may be a
//! rewritten document instead of JSON. Everything is normalized here into
//! [`EditPlan`], and entries missing a required field are dropped with a
//! warning rather than defaulted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::reasoning::ReasoningError;

/// Replace the first occurrence of `match_text` with `replacement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    #[serde(rename = "match")]
    pub match_text: String,
    pub replacement: String,
}

impl EditOperation {
    pub fn new(match_text: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            match_text: match_text.into(),
            replacement: replacement.into(),
        }
    }
}

/// What a reasoning service asks the player to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditPlan {
    /// Literal find/replace list, applied in order.
    Operations {
        operations: Vec<EditOperation>,
        summary: Option<String>,
        /// Entries dropped during normalization.
        malformed: usize,
    },
    /// A whole new document; played through the diff reconciler.
    Rewrite { text: String },
}

impl EditPlan {
    pub fn operations(operations: Vec<EditOperation>) -> Self {
        Self::Operations {
            operations,
            summary: None,
            malformed: 0,
        }
    }

    pub fn rewrite(text: impl Into<String>) -> Self {
        Self::Rewrite { text: text.into() }
    }
}

#[derive(Deserialize)]
struct RawOperation {
    #[serde(rename = "match", alias = "target")]
    match_text: Option<String>,
    #[serde(alias = "content")]
    replacement: Option<String>,
}

impl RawOperation {
    fn normalize(self) -> Option<EditOperation> {
        match (self.match_text, self.replacement) {
            (Some(m), Some(r)) if !m.is_empty() => Some(EditOperation::new(m, r)),
            _ => None,
        }
    }
}

/// Normalize a list of loosely-shaped operation values.
///
/// Returns the valid operations and the number of entries dropped.
pub fn normalize_operations(values: Vec<Value>) -> (Vec<EditOperation>, usize) {
    let mut operations = Vec::with_capacity(values.len());
    let mut malformed = 0;
    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<RawOperation>(value).ok().and_then(RawOperation::normalize) {
            Some(op) => operations.push(op),
            None => {
                warn!(index, "dropping malformed edit operation");
                malformed += 1;
            }
        }
    }
    (operations, malformed)
}

fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Interpret raw model content.
///
/// A JSON object with an `operations` array (or a bare array) becomes an
/// operation list. Any other non-empty content is taken as a full rewrite.
pub fn parse_plan(content: &str) -> Result<EditPlan, ReasoningError> {
    if content.trim().is_empty() {
        return Err(ReasoningError::NoUsableEdits);
    }

    let parsed = serde_json::from_str::<Value>(strip_fences(content)).ok();
    let (values, summary) = match parsed {
        Some(Value::Object(mut obj)) => match obj.remove("operations") {
            Some(Value::Array(values)) => {
                let summary = obj.remove("summary").and_then(|s| s.as_str().map(str::to_string));
                (values, summary)
            }
            _ => return Ok(EditPlan::rewrite(content)),
        },
        Some(Value::Array(values)) => (values, None),
        _ => return Ok(EditPlan::rewrite(content)),
    };

    let (operations, malformed) = normalize_operations(values);
    Ok(EditPlan::Operations {
        operations,
        summary,
        malformed,
    })
}
