//! Shell command execution for check gates.

use crate::errors::GateError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a shell command in a working directory, bounded by a timeout.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, GateError>;

    /// Whether the program invoked by `command` can be found.
    fn is_runnable(&self, command: &str, working_dir: &Path) -> bool {
        resolve_executable(command, working_dir).is_some()
    }
}

/// `sh -c` executor. The child is killed when the timeout elapses.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, GateError> {
        tracing::debug!(command, dir = %working_dir.display(), "Running check command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GateError::SpawnFailed {
                program: command.to_string(),
                source,
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| GateError::Timeout {
                target: command.to_string(),
                secs: timeout.as_secs(),
            })?
            .map_err(|source| GateError::SpawnFailed {
                program: command.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Builtins `sh` runs without looking anything up on `PATH`.
const SHELL_BUILTINS: &[&str] = &[
    ".", ":", "[", "alias", "cd", "command", "echo", "eval", "exec", "exit", "export", "false",
    "printf", "pwd", "read", "return", "set", "shift", "source", "test", "trap", "true", "type",
    "umask", "unset", "wait",
];

/// Locate the program a shell command line would start.
///
/// The line is split on `&&`, `||`, `;`, `|` and newlines. Segments headed by a
/// shell builtin are skipped, and a `cd <dir>` moves the directory later
/// relative programs are resolved against. Leading `VAR=value` assignments are
/// skipped. A program containing a `/` is resolved against the working
/// directory; anything else is looked up on `PATH`. A line made only of
/// builtins resolves to the shell itself.
pub fn resolve_executable(command: &str, working_dir: &Path) -> Option<PathBuf> {
    let mut dir = working_dir.to_path_buf();

    for segment in command_segments(command) {
        let mut words = segment
            .split_whitespace()
            .skip_while(|word| is_env_assignment(word));
        let Some(program) = words.next() else {
            continue;
        };

        if SHELL_BUILTINS.contains(&program) {
            if program == "cd"
                && let Some(target) = words.next()
            {
                dir = dir.join(target.trim_matches(|c: char| c == '"' || c == '\''));
            }
            continue;
        }

        return find_program(program, &dir);
    }

    command
        .split_whitespace()
        .next()
        .and_then(|_| find_program("sh", working_dir))
}

fn command_segments(command: &str) -> Vec<String> {
    command
        .replace("&&", ";")
        .replace("||", ";")
        .split(['\n', ';', '|'])
        .filter(|segment| !segment.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn find_program(program: &str, dir: &Path) -> Option<PathBuf> {
    if program.contains('/') {
        let candidate = dir.join(program);
        return is_executable(&candidate).then_some(candidate);
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|path_dir| path_dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_env_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_executable_on_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_executable("sh -c 'exit 0'", dir.path()).is_some());
        assert!(resolve_executable("RUST_LOG=debug sh -c true", dir.path()).is_some());
        assert!(resolve_executable("definitely-not-a-real-program-xyz --flag", dir.path()).is_none());
        assert!(resolve_executable("   ", dir.path()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_executable_relative_to_working_dir() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("check.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();

        assert!(resolve_executable("./check.sh", dir.path()).is_none());

        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(resolve_executable("./check.sh --all", dir.path()), Some(dir.path().join("./check.sh")));
    }

    #[test]
    fn test_resolve_executable_after_shell_builtins() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_executable("cd . && true", dir.path()).is_some());
        assert!(resolve_executable("export RUST_BACKTRACE=1; sh -c true", dir.path()).is_some());
        assert!(resolve_executable("set -e\necho building >&2", dir.path()).is_some());
        assert!(resolve_executable("cd . && definitely-not-a-real-program-xyz", dir.path()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_executable_follows_cd() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let script = dir.path().join("sub/check.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(resolve_executable("./check.sh", dir.path()).is_none());
        assert_eq!(
            resolve_executable("cd sub && ./check.sh", dir.path()),
            Some(dir.path().join("sub").join("./check.sh"))
        );
    }

    #[tokio::test]
    async fn test_shell_executor_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = ShellExecutor
            .run("echo out; echo err >&2; exit 3", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_shell_executor_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let output = ShellExecutor
            .run("cat marker.txt", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "here");
    }

    #[tokio::test]
    async fn test_shell_executor_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellExecutor
            .run("sleep 5", dir.path(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Timeout { .. }));
    }
}
