//! Action execution: the five step kinds performed against the
//! filesystem, shell, index, and web, honoring the safety flags.
//!
//! Every failure here is converted into a `StepResult` at the step
//! boundary; nothing propagates out of `execute`.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use skipper_core::{Action, Confirm, SafetyConfig, SkipReason, Step, StepResult};
use skipper_index::WorkspaceIndex;

pub mod diff;
pub mod shell;
pub mod web;

use shell::{PlatformShellRunner, ShellRunner, normalize_command};

const EXEC_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Executor {
    workspace_root: Option<PathBuf>,
    shell: Box<dyn ShellRunner>,
    confirm: Box<dyn Confirm>,
    index: Option<WorkspaceIndex>,
}

impl Executor {
    /// When `workspace_root` is set, all file paths are confined to it.
    /// Without one, paths resolve against the current directory with no
    /// containment check; callers opt into that trust boundary.
    pub fn new(workspace_root: Option<PathBuf>, confirm: Box<dyn Confirm>) -> Self {
        Self {
            workspace_root: workspace_root.map(|p| lexical_normalize(&absolutize(&p))),
            shell: Box::new(PlatformShellRunner),
            confirm,
            index: None,
        }
    }

    pub fn with_shell(mut self, shell: Box<dyn ShellRunner>) -> Self {
        self.shell = shell;
        self
    }

    #[must_use]
    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    pub fn execute(&mut self, step: &Step, config: &SafetyConfig) -> StepResult {
        match step.action {
            Action::Read => self.do_read(step),
            Action::Exec => self.do_exec(step, config),
            Action::Write => self.do_write(step, config),
            Action::Retrieve => self.do_retrieve(step),
            Action::ApplyPatch => self.do_apply_patch(step, config),
        }
    }

    fn do_read(&self, step: &Step) -> StepResult {
        let path = match self.resolve_contained(&step.target) {
            Ok(path) => path,
            Err(reason) => return StepResult::Error(reason),
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => StepResult::Success(text),
            Err(err) => StepResult::Error(format!("failed to read '{}': {err}", path.display())),
        }
    }

    fn do_exec(&self, step: &Step, config: &SafetyConfig) -> StepResult {
        if !config.allow_exec {
            return StepResult::Skipped(SkipReason::Disallowed);
        }
        let command = normalize_command(&step.target);
        if command.is_empty() {
            return StepResult::Error("empty command after normalization".to_string());
        }
        let cwd = self
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        match self.shell.run(&command, &cwd, EXEC_TIMEOUT) {
            Ok(run) => {
                let mut text = String::new();
                text.push_str(&run.stdout);
                if !run.stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&run.stderr);
                }
                if run.timed_out {
                    text.push_str("\n[command timed out]");
                } else if let Some(code) = run.status
                    && code != 0
                {
                    text.push_str(&format!("\n[exit status {code}]"));
                }
                StepResult::Success(text)
            }
            Err(err) => StepResult::Error(format!("exec failed: {err}")),
        }
    }

    fn do_write(&self, step: &Step, config: &SafetyConfig) -> StepResult {
        if !config.allow_write {
            return StepResult::Skipped(SkipReason::Disallowed);
        }
        let new_content = step.content.clone().unwrap_or_default();
        let path = match self.resolve_contained(&step.target) {
            Ok(path) => path,
            Err(reason) => return StepResult::Error(reason),
        };
        let old_content = std::fs::read_to_string(&path).unwrap_or_default();

        if !config.yes {
            let preview = diff::diff_preview(&step.target, &old_content, &new_content);
            let question = format!("apply this write?\n{preview}");
            if !self.confirm.confirm(&question) {
                return StepResult::Declined;
            }
        }

        if let Some(parent) = path.parent()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            return StepResult::Error(format!(
                "failed to create '{}': {err}",
                parent.display()
            ));
        }
        if let Err(err) = std::fs::write(&path, &new_content) {
            return StepResult::Error(format!("failed to write '{}': {err}", path.display()));
        }

        let mut text = format!("wrote {} ({} bytes)", step.target, new_content.len());
        if let Some(root) = &self.workspace_root
            && diff::is_git_work_tree(root)
        {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            let staged = diff::unified_diff_for_write(&rel, &old_content, &new_content);
            if let Err(err) = diff::git_apply_cached(&staged, root) {
                text.push_str(&format!("\nwarning: git index not updated: {err}"));
            }
        }
        StepResult::Success(text)
    }

    fn do_retrieve(&mut self, step: &Step) -> StepResult {
        let Some(root) = self.workspace_root.clone() else {
            return StepResult::Success("[]".to_string());
        };
        let index = self
            .index
            .get_or_insert_with(|| WorkspaceIndex::build(&root));
        let hits = index.search(&step.target, step.top_k());
        match serde_json::to_string_pretty(&hits) {
            Ok(json) => StepResult::Success(json),
            Err(err) => StepResult::Error(format!("failed to serialize hits: {err}")),
        }
    }

    fn do_apply_patch(&self, step: &Step, config: &SafetyConfig) -> StepResult {
        if !config.allow_write {
            return StepResult::Skipped(SkipReason::Disallowed);
        }
        let Some(patch) = step.content.as_deref() else {
            return StepResult::Error("apply_patch requires patch content".to_string());
        };
        let targets = diff::patch_target_paths(patch);
        if targets.is_empty() {
            return StepResult::Error("patch lists no '+++ b/<path>' targets".to_string());
        }

        // All-or-nothing: every target must be contained before any
        // write happens.
        let mut resolved = Vec::with_capacity(targets.len());
        for target in &targets {
            match self.resolve_contained(target) {
                Ok(path) => resolved.push(path),
                Err(reason) => return StepResult::Error(reason),
            }
        }

        if !config.yes {
            let question = format!(
                "apply this patch to {}?\n{patch}",
                targets.join(", ")
            );
            if !self.confirm.confirm(&question) {
                return StepResult::Declined;
            }
        }

        let dir = self
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        if diff::is_git_work_tree(&dir) {
            return match diff::git_apply(patch, &dir) {
                Ok(()) => StepResult::Success(format!("patched {}", targets.join(", "))),
                Err(err) => StepResult::Error(err.to_string()),
            };
        }

        // Best-effort fallback outside version control: the diff's
        // `+`-payload lines become the first target's full content.
        let content = diff::naive_patch_content(patch);
        let path = &resolved[0];
        if let Some(parent) = path.parent()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            return StepResult::Error(format!(
                "failed to create '{}': {err}",
                parent.display()
            ));
        }
        match std::fs::write(path, &content) {
            Ok(()) => StepResult::Success(format!("patched {} (fallback rewrite)", targets[0])),
            Err(err) => StepResult::Error(format!("failed to write '{}': {err}", path.display())),
        }
    }

    /// Resolve a target path and enforce workspace containment.
    /// Comparison is component-wise over normalized absolute paths, so
    /// a sibling directory sharing the root's name as a string prefix
    /// does not pass.
    fn resolve_contained(&self, raw: &str) -> Result<PathBuf, String> {
        let raw_path = PathBuf::from(raw.trim());
        let resolved = match &self.workspace_root {
            Some(root) if raw_path.is_relative() => root.join(&raw_path),
            _ => absolutize(&raw_path),
        };
        let normalized = lexical_normalize(&resolved);
        if let Some(root) = &self.workspace_root
            && !normalized.starts_with(root)
        {
            return Err(format!(
                "path '{raw}' escapes workspace root '{}'",
                root.display()
            ));
        }
        Ok(normalized)
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

/// Purely lexical normalization: `.` dropped, `..` pops. No symlink
/// resolution, so containment holds for paths that do not exist yet.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
