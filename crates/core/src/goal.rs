//! Goal judgments — the structured verdict an LLM returns after an agent attempt.
//!
//! The wire contract is a strict JSON object:
//! `{"reason": str, "result": any, "is_goal_satisfied": bool}`.
//! Keys are case-sensitive and the flag must be a literal `true`/`false`.

use serde::{Deserialize, Serialize};

/// One LLM-judged verdict on whether an agent attempt met its goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalResult {
    /// Why the judge decided the way it did.
    pub reason: String,

    /// The distilled outcome of the attempt.
    pub result: serde_json::Value,

    /// Strict verdict; agents retry while this is false.
    pub is_goal_satisfied: bool,
}

/// Why a goal-check reply could not be turned into a [`GoalResult`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GoalParseError {
    #[error("reply contains no JSON object")]
    NoObject,

    #[error("reply is not a valid goal result: {0}")]
    Invalid(String),
}

impl GoalResult {
    /// Parse a goal-check reply.
    ///
    /// Models often wrap JSON in Markdown fences or a sentence of prose, so
    /// the first balanced `{...}` object in the text is parsed. Parsing
    /// itself is strict: all three keys must be present and the flag must
    /// be a boolean.
    pub fn parse(reply: &str) -> Result<Self, GoalParseError> {
        let object = first_json_object(reply).ok_or(GoalParseError::NoObject)?;
        serde_json::from_str(object).map_err(|e| GoalParseError::Invalid(e.to_string()))
    }

    /// One-line rendering used when feeding prior conclusions to later agents.
    pub fn summary_line(&self) -> String {
        let result = match &self.result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        format!(
            "reason: {} | result: {} | is_goal_satisfied: {}",
            self.reason, result, self.is_goal_satisfied
        )
    }
}

/// Locate the first balanced JSON object in `text`, honouring string literals.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
