use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellRunResult {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

pub trait ShellRunner {
    fn run(&self, cmd: &str, cwd: &Path, timeout: Duration) -> Result<ShellRunResult>;
}

#[derive(Debug, Default)]
pub struct PlatformShellRunner;

impl ShellRunner for PlatformShellRunner {
    fn run(&self, cmd: &str, cwd: &Path, timeout: Duration) -> Result<ShellRunResult> {
        let mut child = spawn_command(cmd, cwd)?;

        let status = child.wait_timeout(timeout)?;
        if status.is_none() {
            child.kill()?;
            let output = child.wait_with_output()?;
            return Ok(ShellRunResult {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: true,
            });
        }

        let output = child.wait_with_output()?;
        Ok(ShellRunResult {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        })
    }
}

/// Strip the noise oracles wrap commands in: surrounding whitespace,
/// one layer of matching quotes, and stray leading/trailing backslashes.
#[must_use]
pub fn normalize_command(raw: &str) -> String {
    let mut cmd = raw.trim();
    if cmd.len() >= 2 {
        let bytes = cmd.as_bytes();
        let first = bytes[0];
        let last = bytes[cmd.len() - 1];
        if first == last && (first == b'"' || first == b'\'' || first == b'`') {
            cmd = &cmd[1..cmd.len() - 1];
        }
    }
    cmd.trim_matches('\\').trim().to_string()
}

fn spawn_command(cmd: &str, cwd: &Path) -> Result<Child> {
    let cwd = if cwd.exists() {
        std::fs::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf())
    } else {
        cwd.to_path_buf()
    };
    let mut errors = Vec::new();
    for mut command in candidate_commands(cmd) {
        command.current_dir(&cwd);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(Stdio::null());
        let program = command.get_program().to_string_lossy().to_string();
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(err) => errors.push(format!("{program}: {err}")),
        }
    }
    Err(anyhow!(
        "failed to spawn command '{cmd}' in '{}': {}",
        cwd.display(),
        errors.join(" | ")
    ))
}

/// Candidate shells in preference order. On Windows a POSIX subsystem
/// is tried first so oracle-produced commands run unchanged; `cmd` gets
/// a small translation table for the common POSIX spellings, then
/// powershell is the last resort.
#[cfg(target_os = "windows")]
fn candidate_commands(cmd: &str) -> Vec<Command> {
    let mut commands = Vec::new();

    let mut bash_shell = Command::new("bash");
    bash_shell.arg("-lc").arg(cmd);
    commands.push(bash_shell);

    let mut cmd_shell = Command::new("cmd");
    cmd_shell.arg("/C").arg(translate_posix_for_cmd(cmd));
    commands.push(cmd_shell);

    let mut ps_shell = Command::new("powershell");
    ps_shell
        .arg("-NoLogo")
        .arg("-NoProfile")
        .arg("-Command")
        .arg(cmd);
    commands.push(ps_shell);

    commands
}

#[cfg(not(target_os = "windows"))]
fn candidate_commands(cmd: &str) -> Vec<Command> {
    let mut commands = Vec::new();
    let mut sh_shell = Command::new("sh");
    sh_shell.arg("-lc").arg(cmd);
    commands.push(sh_shell);

    let mut bash_shell = Command::new("bash");
    bash_shell.arg("-lc").arg(cmd);
    commands.push(bash_shell);

    commands
}

#[cfg(any(target_os = "windows", test))]
fn translate_posix_for_cmd(cmd: &str) -> String {
    let mut parts = cmd.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("");
    let translated = match head {
        "ls" => "dir",
        "cat" => "type",
        "rm" => "del",
        "cp" => "copy",
        "mv" => "move",
        "pwd" => "cd",
        "clear" => "cls",
        _ => return cmd.to_string(),
    };
    if rest.is_empty() {
        translated.to_string()
    } else {
        format!("{translated} {rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_quotes_and_backslashes() {
        assert_eq!(normalize_command("  ls -la  "), "ls -la");
        assert_eq!(normalize_command("\"echo hi\""), "echo hi");
        assert_eq!(normalize_command("'echo hi'"), "echo hi");
        assert_eq!(normalize_command("\\ls\\"), "ls");
        // Only one layer of quotes is removed.
        assert_eq!(normalize_command("\"'echo hi'\""), "'echo hi'");
    }

    #[test]
    fn normalize_keeps_interior_quotes() {
        assert_eq!(normalize_command("echo \"hi\""), "echo \"hi\"");
    }

    #[test]
    fn posix_translation_covers_the_common_spellings() {
        assert_eq!(translate_posix_for_cmd("ls -la"), "dir -la");
        assert_eq!(translate_posix_for_cmd("cat notes.txt"), "type notes.txt");
        assert_eq!(translate_posix_for_cmd("pwd"), "cd");
        assert_eq!(translate_posix_for_cmd("git status"), "git status");
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn shell_runner_executes_command() {
        let runner = PlatformShellRunner;
        let out = runner
            .run("echo skipper", Path::new("."), Duration::from_secs(5))
            .expect("run command");
        assert!(!out.timed_out);
        assert!(out.stdout.contains("skipper"));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn non_zero_exit_is_captured_not_an_error() {
        let runner = PlatformShellRunner;
        let out = runner
            .run("exit 3", Path::new("."), Duration::from_secs(5))
            .expect("run command");
        assert_eq!(out.status, Some(3));
    }
}
