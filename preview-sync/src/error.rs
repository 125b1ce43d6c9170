//! Error types for preview-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from a working-copy sync.
///
/// None of these are fatal to the daemon: they are reported to the caller that
/// triggered the sync and the coordinator goes back to idle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The directory exists but is not the root of a git checkout.
    #[error("{path} is not a git working copy")]
    NotAGitRepository { path: PathBuf },

    /// An external command exceeded its own timeout and was killed.
    #[error("`{command}` did not finish within {secs}s")]
    CommandTimeout { command: String, secs: u64 },

    /// An external command exited unsuccessfully.
    #[error("`{command}` failed with exit code {}: {stderr}", display_code(.exit_code))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// An external command could not be started at all.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (killed by signal)".to_string())
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
