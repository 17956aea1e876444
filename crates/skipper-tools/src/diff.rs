//! Diff helpers: the line-oriented preview shown before writes, patch
//! header parsing, and the git plumbing used to apply diffs.

use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::process::{Command, Stdio};

/// Line-oriented preview of replacing `old` with `new`, unified-diff
/// flavored. Old content is the empty string for files being created.
#[must_use]
pub fn diff_preview(path: &str, old: &str, new: &str) -> String {
    let old_lines: Vec<&str> = if old.is_empty() { Vec::new() } else { old.lines().collect() };
    let new_lines: Vec<&str> = if new.is_empty() { Vec::new() } else { new.lines().collect() };

    let mut out = String::new();
    out.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));
    let common = old_lines
        .iter()
        .zip(new_lines.iter())
        .take_while(|(a, b)| a == b)
        .count();
    for line in &old_lines[..common] {
        out.push_str(&format!(" {line}\n"));
    }
    for line in &old_lines[common..] {
        out.push_str(&format!("-{line}\n"));
    }
    for line in &new_lines[common..] {
        out.push_str(&format!("+{line}\n"));
    }
    out
}

/// Produce a minimal unified diff for one file, the shape `git apply`
/// accepts for whole-content replacement.
#[must_use]
pub fn unified_diff_for_write(rel_path: &str, old: &str, new: &str) -> String {
    let old_lines: Vec<&str> = if old.is_empty() { Vec::new() } else { old.lines().collect() };
    let new_lines: Vec<&str> = if new.is_empty() { Vec::new() } else { new.lines().collect() };
    let old_header = if old_lines.is_empty() {
        "--- /dev/null".to_string()
    } else {
        format!("--- a/{rel_path}")
    };
    let mut out = format!(
        "{old_header}\n+++ b/{rel_path}\n@@ -1,{} +1,{} @@\n",
        old_lines.len(),
        new_lines.len()
    );
    for line in &old_lines {
        out.push_str(&format!("-{line}\n"));
    }
    for line in &new_lines {
        out.push_str(&format!("+{line}\n"));
    }
    out
}

/// Target paths of a patch, parsed from its `+++ b/<path>` headers
/// only. These are the paths the containment check covers.
#[must_use]
pub fn patch_target_paths(diff: &str) -> Vec<String> {
    let mut files = Vec::new();
    for line in diff.lines() {
        if let Some(raw) = line.strip_prefix("+++ ")
            && let Some(parsed) = parse_patch_path(raw)
            && !files.contains(&parsed)
        {
            files.push(parsed);
        }
    }
    files
}

fn parse_patch_path(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw == "/dev/null" {
        return None;
    }
    let normalized = raw.strip_prefix("b/").unwrap_or(raw);
    if normalized.is_empty() {
        return None;
    }
    Some(normalized.to_string())
}

/// The fallback transform used outside a git work tree: every
/// `+`-payload line of the whole diff becomes the target file's new
/// content. Not a real patch algorithm; multi-hunk context and
/// multi-file diffs are beyond it, and callers treat it as best-effort.
#[must_use]
pub fn naive_patch_content(diff: &str) -> String {
    let mut out = String::new();
    for line in diff.lines() {
        if line.starts_with("+++") {
            continue;
        }
        if let Some(payload) = line.strip_prefix('+') {
            out.push_str(payload);
            out.push('\n');
        }
    }
    out
}

pub fn is_git_work_tree(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// `git apply` the diff text in `dir`. Stderr is surfaced in the error.
pub fn git_apply(diff: &str, dir: &Path) -> Result<()> {
    run_git_apply(diff, dir, &["apply"])
}

/// `git apply --cached`, used to keep the index in step after a direct
/// file write. Callers treat failure as a warning.
pub fn git_apply_cached(diff: &str, dir: &Path) -> Result<()> {
    run_git_apply(diff, dir, &["apply", "--cached"])
}

fn run_git_apply(diff: &str, dir: &Path, args: &[&str]) -> Result<()> {
    use std::io::Write;

    let mut child = Command::new("git")
        .args(args)
        .arg("-")
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to execute git apply")?;
    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(diff.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn git_stdout(dir: &Path, args: &[&str]) -> String {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).to_string())
            .unwrap_or_default()
    }

    #[test]
    fn preview_marks_removed_and_added_lines() {
        let preview = diff_preview("notes.txt", "same\nold\n", "same\nnew\n");
        assert!(preview.contains("--- a/notes.txt"));
        assert!(preview.contains(" same"));
        assert!(preview.contains("-old"));
        assert!(preview.contains("+new"));
    }

    #[test]
    fn preview_of_a_new_file_is_all_additions() {
        let preview = diff_preview("fresh.txt", "", "one\ntwo\n");
        assert!(!preview.contains("\n-"));
        assert!(preview.contains("+one"));
        assert!(preview.contains("+two"));
    }

    #[test]
    fn target_paths_come_from_plus_headers_only() {
        let diff = "--- a/old_name.txt\n+++ b/src/lib.rs\n@@ -1 +1 @@\n-x\n+y\n\
                    --- a/other.txt\n+++ b/docs/guide.md\n@@ -1 +1 @@\n-a\n+b\n";
        assert_eq!(
            patch_target_paths(diff),
            vec!["src/lib.rs".to_string(), "docs/guide.md".to_string()]
        );
    }

    #[test]
    fn dev_null_targets_are_ignored() {
        let diff = "--- a/gone.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-bye\n";
        assert!(patch_target_paths(diff).is_empty());
    }

    #[test]
    fn naive_content_keeps_plus_payload_lines() {
        let diff = "--- a/f.txt\n+++ b/f.txt\n@@ -1,2 +1,2 @@\n unchanged\n-old line\n+new line\n+added line\n";
        assert_eq!(naive_patch_content(diff), "new line\nadded line\n");
    }

    #[test]
    fn naive_content_skips_the_file_header() {
        let diff = "+++ b/f.txt\n+only\n";
        assert_eq!(naive_patch_content(diff), "only\n");
    }

    #[test]
    fn git_apply_cached_stages_a_new_file_diff() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(git(dir.path(), &["init", "-q"]));
        assert!(is_git_work_tree(dir.path()));

        let staged = unified_diff_for_write("f.txt", "", "one\ntwo\n");
        git_apply_cached(&staged, dir.path()).expect("stage");
        assert!(git_stdout(dir.path(), &["ls-files", "--cached"]).contains("f.txt"));
    }

    #[test]
    fn git_apply_cached_stages_a_modified_file_diff() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(git(dir.path(), &["init", "-q"]));
        std::fs::write(dir.path().join("f.txt"), "before\n").expect("seed");
        assert!(git(dir.path(), &["add", "f.txt"]));

        let staged = unified_diff_for_write("f.txt", "before\n", "after\n");
        git_apply_cached(&staged, dir.path()).expect("stage");
        let diff = git_stdout(dir.path(), &["diff", "--cached", "f.txt"]);
        assert!(diff.contains("+after"), "staged diff:\n{diff}");
    }

    #[test]
    fn git_apply_mismatched_context_is_an_error() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(git(dir.path(), &["init", "-q"]));
        std::fs::write(dir.path().join("f.txt"), "actual\n").expect("seed");

        let diff = "--- a/f.txt\n+++ b/f.txt\n@@ -1 +1 @@\n-expected\n+new\n";
        let err = git_apply(diff, dir.path()).expect_err("context mismatch");
        assert!(err.to_string().contains("git apply"));
        let kept = std::fs::read_to_string(dir.path().join("f.txt")).expect("read back");
        assert_eq!(kept, "actual\n");
    }
}
