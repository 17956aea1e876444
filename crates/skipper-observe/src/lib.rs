//! Operator-facing logging and the persisted run log.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use skipper_core::{HistoryEntry, PREVIEW_MAX_CHARS, SafetyConfig, StepResult, truncate_preview};
use std::path::PathBuf;
use uuid::Uuid;

/// Everything persisted for one run, written once at exit.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: Uuid,
    pub goal: String,
    pub started_at: String,
    pub flags: SafetyConfig,
    pub history: Vec<HistoryEntry>,
}

impl RunLog {
    pub fn new(goal: &str, flags: &SafetyConfig) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            goal: goal.to_string(),
            started_at: Utc::now().to_rfc3339(),
            flags: flags.clone(),
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Observer {
    pub log_path: Option<PathBuf>,
    pub verbose: bool,
}

impl Observer {
    pub fn new(log_path: Option<PathBuf>, verbose: bool) -> Self {
        Self { log_path, verbose }
    }

    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[skipper] {msg}");
        }
    }

    pub fn warn_log(&self, msg: &str) {
        eprintln!("[skipper] warning: {msg}");
    }

    /// Step trace line: full results live in history, the console gets
    /// a bounded preview.
    pub fn print_step(&self, number: usize, entry: &HistoryEntry) {
        let action = entry
            .step
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let target = entry
            .step
            .get("target")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        println!("step {number}: {action} {target} -> {}", entry.result.label());
        let detail = match &entry.result {
            StepResult::Success(text) => text.as_str(),
            StepResult::InvalidStep(reason) => reason.as_str(),
            StepResult::Error(message) => message.as_str(),
            StepResult::Declined => "",
            StepResult::Skipped(reason) => return println!("  ({reason})"),
        };
        if !detail.is_empty() {
            for line in truncate_preview(detail, PREVIEW_MAX_CHARS).lines() {
                println!("  {line}");
            }
        }
    }

    /// Write the run log if a path was configured. Pretty JSON, one
    /// file per run, overwritten on rewrite.
    pub fn flush_run_log(&self, run: &RunLog) -> Result<()> {
        let Some(path) = &self.log_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(run)?;
        std::fs::write(path, body)
            .with_context(|| format!("failed to write run log '{}'", path.display()))
    }
}
