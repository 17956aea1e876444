//! Oracle protocol: prompts, JSON extraction from free text, and the
//! single-retry policy.
//!
//! The oracle emits plans and steps as plain text that should contain
//! JSON but may wrap it in code fences or commentary. This module
//! extracts and shapes that output; it never trusts it.

use serde_json::Value;
use skipper_core::{HistoryEntry, OracleMessage};
use skipper_llm::{Oracle, OracleError};
use thiserror::Error;

const STEP_SCHEMA: &str = r#"Each step is a JSON object:
{"action":"read"|"exec"|"write"|"retrieve"|"apply_patch","target":string,"content"?:string,"topK"?:number}
- "target" is a file path (read/write), a shell command (exec), or a search query (retrieve).
- "content" is the file body for write, or unified-diff text for apply_patch.
Example step: {"action":"exec","target":"ls"}"#;

fn plan_system_prompt() -> String {
    format!(
        "You are a planning assistant. Turn the user's goal into an ordered plan.\n\
         Respond with a JSON array of steps and nothing else.\n{STEP_SCHEMA}\n\
         Example plan: [{{\"action\":\"exec\",\"target\":\"ls\"}}]"
    )
}

fn next_step_system_prompt() -> String {
    format!(
        "You are a planning assistant continuing a run. Given the goal and the \
         executed history, respond with exactly one next step as a JSON object, \
         or [] if the goal is achieved.\n{STEP_SCHEMA}"
    )
}

fn recovery_system_prompt() -> String {
    format!(
        "You are a planning assistant. A step just failed. Respond with exactly \
         one corrective step as a JSON object, or [] if there is no sensible \
         correction.\n{STEP_SCHEMA}"
    )
}

const JSON_ONLY_RETRY: &str =
    "Respond with JSON only. No prose, no markdown, no code fences.";

#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("oracle output contained no JSON plan; raw output:\n{raw}")]
    NoJson { raw: String },
    #[error("oracle output was not a JSON array of steps; raw output:\n{raw}")]
    NotAnArray { raw: String },
}

pub struct Planner<'a> {
    oracle: &'a dyn Oracle,
}

impl<'a> Planner<'a> {
    pub fn new(oracle: &'a dyn Oracle) -> Self {
        Self { oracle }
    }

    /// Initial plan for a goal. Failure here is fatal to the run; the
    /// error carries the raw oracle text for diagnosis.
    pub fn request_plan(&self, goal: &str) -> Result<Vec<Value>, PlanParseError> {
        let system = plan_system_prompt();
        let raw = self.complete(&system, goal)?;
        if let Some(Value::Array(steps)) = extract_json(&raw) {
            return Ok(steps);
        }
        // Exactly one stricter retry when an array was required but not
        // produced.
        let retry_system = format!("{system}\n{JSON_ONLY_RETRY}");
        let raw = self.complete(&retry_system, goal)?;
        match extract_json(&raw) {
            Some(Value::Array(steps)) => Ok(steps),
            Some(_) => Err(PlanParseError::NotAnArray { raw }),
            None => Err(PlanParseError::NoJson { raw }),
        }
    }

    /// Next step once the queue drains. `None` means the oracle is done
    /// or produced nothing usable; both end the run gracefully.
    pub fn request_next_step(&self, goal: &str, history: &[HistoryEntry]) -> Option<Value> {
        let user = serde_json::json!({ "goal": goal, "history": history }).to_string();
        self.request_single_step(&next_step_system_prompt(), &user)
    }

    /// Corrective step after a failure. `None` is non-fatal.
    pub fn request_recovery_step(&self, goal: &str, step: &Value, error: &str) -> Option<Value> {
        let user = serde_json::json!({ "goal": goal, "failed_step": step, "error": error })
            .to_string();
        self.request_single_step(&recovery_system_prompt(), &user)
    }

    fn request_single_step(&self, system: &str, user: &str) -> Option<Value> {
        let raw = self.complete(system, user).ok()?;
        if let Some(step) = shape_single_step(extract_json(&raw)) {
            return Some(step);
        }
        if matches!(extract_json(&raw), Some(Value::Array(ref a)) if a.is_empty()) {
            return None;
        }
        let retry_system = format!("{system}\n{JSON_ONLY_RETRY}");
        let raw = self.complete(&retry_system, user).ok()?;
        shape_single_step(extract_json(&raw))
    }

    fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        self.oracle.complete(&[
            OracleMessage::system(system),
            OracleMessage::user(user),
        ])
    }
}

/// Accept an object, or a non-empty array's first object; an empty
/// array (oracle reports completion) and anything else are `None`.
fn shape_single_step(value: Option<Value>) -> Option<Value> {
    match value? {
        object @ Value::Object(_) => Some(object),
        Value::Array(items) => items.into_iter().find(|v| v.is_object()),
        _ => None,
    }
}

/// Extract the first JSON value from free text: direct parse first,
/// then a scan for the first balanced top-level `{...}` or `[...]`.
pub fn extract_json(text: &str) -> Option<Value> {
    let cleaned = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Some(value);
    }
    let bytes = cleaned.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        let (open, close) = match b {
            b'{' => (b'{', b'}'),
            b'[' => (b'[', b']'),
            _ => continue,
        };
        if let Some(end) = find_matching_delim(cleaned, i, open, close)
            && let Ok(value) = serde_json::from_str::<Value>(&cleaned[i..=end])
        {
            return Some(value);
        }
    }
    None
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json")
        && let Some(inner) = rest.strip_suffix("```")
    {
        return inner.trim();
    }
    if let Some(rest) = trimmed.strip_prefix("```")
        && let Some(inner) = rest.strip_suffix("```")
    {
        return inner.trim();
    }
    trimmed
}

/// Index of the `close` matching the `open` at `start`. String- and
/// escape-aware so braces inside JSON strings do not confuse the scan.
fn find_matching_delim(text: &str, start: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape_next {
            escape_next = false;
            continue;
        }
        if b == b'\\' && in_string {
            escape_next = true;
            continue;
        }
        if b == b'"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}
