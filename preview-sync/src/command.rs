//! External command runner with a per-command timeout.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::SyncError;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args…` in `cwd`, killing it if it outlives `limit`.
///
/// Prompts are disabled so a credential request fails instead of hanging.
pub async fn run<S: AsRef<str>>(
    program: &str,
    args: &[S],
    cwd: &Path,
    limit: Duration,
) -> Result<CommandOutput, SyncError> {
    let command = command_line(program, args);
    tracing::debug!(command = %command, cwd = %cwd.display(), "running");

    let child = Command::new(program)
        .args(args.iter().map(AsRef::as_ref))
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SyncError::Spawn {
            command: command.clone(),
            source,
        })?;

    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output.map_err(|e| crate::error::io_err(cwd, e))?,
        Err(_) => {
            tracing::warn!(command = %command, secs = limit.as_secs(), "command timed out");
            return Err(SyncError::CommandTimeout {
                command,
                secs: limit.as_secs(),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(SyncError::CommandFailed {
            command,
            exit_code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(CommandOutput { stdout, stderr })
}

pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .collect::<Vec<_>>()
        .join(" ")
}
