//! Step validation: schema and allow-list checks applied to every
//! candidate step before execution.
//!
//! `validate` is total over arbitrary JSON. Malformed input is a
//! validation failure, never a panic, so oracle output of any shape can
//! be fed straight in.

use serde_json::Value;
use skipper_core::{Action, SafetyConfig, Step};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("step is not a JSON object")]
    NotAnObject,
    #[error("step does not deserialize: {0}")]
    Malformed(String),
}

/// Check a candidate step against the schema and the configured
/// whitelist. Returns `None` when the step is acceptable, otherwise the
/// reason it was rejected. Checks run in order and short-circuit on the
/// first failure.
#[must_use]
pub fn validate(step: &Value, config: &SafetyConfig) -> Option<String> {
    let Some(obj) = step.as_object() else {
        return Some("step must be a JSON object".to_string());
    };

    let action = match obj.get("action") {
        None => return Some("missing 'action' field".to_string()),
        Some(Value::String(raw)) => match Action::parse(raw) {
            Some(action) => action,
            None => return Some(format!("unknown action '{raw}'")),
        },
        Some(other) => return Some(format!("'action' must be a string, got {other}")),
    };

    let target = obj.get("target").and_then(Value::as_str).unwrap_or("");
    if action != Action::ApplyPatch && target.trim().is_empty() {
        return Some(format!("action '{action}' requires a non-empty 'target'"));
    }

    match action {
        Action::Write => {
            if !matches!(obj.get("content"), Some(Value::String(_))) {
                return Some("write requires 'content' to be a string".to_string());
            }
        }
        Action::ApplyPatch => {
            let ok = matches!(obj.get("content"), Some(Value::String(s)) if !s.trim().is_empty());
            if !ok {
                return Some("apply_patch requires non-empty 'content'".to_string());
            }
        }
        _ => {}
    }

    if !config.whitelist.is_empty() {
        let content = obj.get("content").and_then(Value::as_str).unwrap_or("");
        let allowed = config
            .whitelist
            .iter()
            .any(|entry| target.contains(entry.as_str()) || content.contains(entry.as_str()));
        if !allowed {
            return Some(format!("target '{target}' not covered by whitelist"));
        }
    }

    None
}

/// Deserialize a step value that already passed `validate`.
pub fn parse_step(step: &Value) -> Result<Step, PolicyError> {
    if !step.is_object() {
        return Err(PolicyError::NotAnObject);
    }
    serde_json::from_value(step.clone()).map_err(|e| PolicyError::Malformed(e.to_string()))
}
