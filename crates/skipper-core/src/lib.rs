use serde::{Deserialize, Serialize};

/// Default number of chunks returned by a retrieve step.
pub const RETRIEVE_TOP_K_DEFAULT: usize = 5;

/// Display cap for result text in the step trace. Full text is always
/// kept in history; only the printed preview is bounded.
pub const PREVIEW_MAX_CHARS: usize = 2000;

/// The five action kinds a step can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Exec,
    Write,
    Retrieve,
    ApplyPatch,
}

impl Action {
    /// Parse a wire action name, case-insensitively. Returns `None` for
    /// unknown names.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "read" => Self::Read,
            "exec" => Self::Exec,
            "write" => Self::Write,
            "retrieve" => Self::Retrieve,
            "apply_patch" => Self::ApplyPatch,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Exec => "exec",
            Self::Write => "write",
            Self::Retrieve => "retrieve",
            Self::ApplyPatch => "apply_patch",
        }
    }

    /// Whether this action mutates the filesystem or runs commands.
    /// Read and Retrieve stay runnable under `--simulate`.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        matches!(self, Self::Exec | Self::Write | Self::ApplyPatch)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of agent work.
///
/// Wire format: `{"action":"read"|"exec"|"write"|"retrieve"|"apply_patch",
/// "target":string, "content"?:string, "topK"?:number}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action: Action,
    /// File path (read/write/apply_patch context), shell command (exec),
    /// or free-text query (retrieve). Optional description for apply_patch.
    #[serde(default)]
    pub target: String,
    /// Required for write (file body, may be empty) and apply_patch
    /// (unified-diff text, non-empty).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Result count for retrieve, default 5.
    #[serde(rename = "topK", skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl Step {
    pub fn new(action: Action, target: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            content: None,
            top_k: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn top_k(&self) -> usize {
        self.top_k.unwrap_or(RETRIEVE_TOP_K_DEFAULT)
    }
}

/// Why a step was skipped without executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DryRun,
    Simulate,
    Disallowed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::DryRun => "dry-run",
            Self::Simulate => "simulate",
            Self::Disallowed => "disallowed",
        })
    }
}

/// Outcome of attempting a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepResult {
    Success(String),
    InvalidStep(String),
    Declined,
    Skipped(SkipReason),
    Error(String),
}

impl StepResult {
    /// Text that reflection scans for failure patterns. Skips and
    /// declines are operator decisions, not failures.
    #[must_use]
    pub fn outcome_text(&self) -> Option<&str> {
        match self {
            Self::Success(text) => Some(text),
            Self::Error(message) => Some(message),
            Self::InvalidStep(_) | Self::Declined | Self::Skipped(_) => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "ok",
            Self::InvalidStep(_) => "invalid",
            Self::Declined => "declined",
            Self::Skipped(_) => "skipped",
            Self::Error(_) => "error",
        }
    }
}

/// One executed (or gated) step with its outcome. The raw step value is
/// kept so malformed steps are recorded verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: serde_json::Value,
    pub result: StepResult,
}

/// Immutable snapshot of the run-time safety flags, constructed once
/// from invocation parameters and passed by reference everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub allow_exec: bool,
    pub allow_write: bool,
    pub max_steps: usize,
    pub dry_run: bool,
    pub simulate: bool,
    pub confirm_exec: bool,
    pub confirm_write: bool,
    pub confirm_read: bool,
    /// Auto-confirm: answers yes to every confirmation prompt.
    pub yes: bool,
    /// When non-empty, at least one entry must appear as a substring of
    /// a step's target or content for the step to pass validation.
    pub whitelist: Vec<String>,
    pub reflect: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            allow_exec: false,
            allow_write: false,
            max_steps: 20,
            dry_run: false,
            simulate: false,
            confirm_exec: false,
            confirm_write: false,
            confirm_read: false,
            yes: false,
            whitelist: Vec::new(),
            reflect: false,
        }
    }
}

/// A message sent to the reasoning oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl OracleMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Blocking confirmation gate. The controller and executor issue
/// questions through this seam; the process does no other work while
/// waiting on the answer.
pub trait Confirm {
    fn confirm(&self, question: &str) -> bool;
}

/// Answers yes to everything. Used when `--yes` is set and in tests.
#[derive(Debug, Default)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}

/// Bound a string for display, appending an ellipsis marker when cut.
/// Cuts on a char boundary.
#[must_use]
pub fn truncate_preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}... [truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parse_is_case_insensitive() {
        assert_eq!(Action::parse("READ"), Some(Action::Read));
        assert_eq!(Action::parse("Apply_Patch"), Some(Action::ApplyPatch));
        assert_eq!(Action::parse(" exec "), Some(Action::Exec));
        assert_eq!(Action::parse("delete"), None);
    }

    #[test]
    fn step_wire_format_uses_top_k_camel_case() {
        let step = Step {
            action: Action::Retrieve,
            target: "shell runner".to_string(),
            content: None,
            top_k: Some(3),
        };
        let value = serde_json::to_value(&step).expect("serialize");
        assert_eq!(value["action"], "retrieve");
        assert_eq!(value["topK"], 3);
        assert!(value.get("content").is_none());
    }

    #[test]
    fn step_round_trips_from_wire_json() {
        let step: Step = serde_json::from_str(
            r#"{"action":"write","target":"notes.txt","content":"hello"}"#,
        )
        .expect("deserialize");
        assert_eq!(step.action, Action::Write);
        assert_eq!(step.content.as_deref(), Some("hello"));
        assert_eq!(step.top_k(), RETRIEVE_TOP_K_DEFAULT);
    }

    #[test]
    fn outcome_text_covers_success_and_error_only() {
        assert!(StepResult::Success("done".into()).outcome_text().is_some());
        assert!(StepResult::Error("boom".into()).outcome_text().is_some());
        assert!(StepResult::Declined.outcome_text().is_none());
        assert!(
            StepResult::Skipped(SkipReason::DryRun)
                .outcome_text()
                .is_none()
        );
    }

    #[test]
    fn truncate_preview_marks_cuts() {
        assert_eq!(truncate_preview("short", 10), "short");
        let long = "x".repeat(30);
        let cut = truncate_preview(&long, 10);
        assert!(cut.starts_with("xxxxxxxxxx"));
        assert!(cut.ends_with("[truncated]"));
    }
}
