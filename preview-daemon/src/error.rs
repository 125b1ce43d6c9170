use std::path::PathBuf;

use preview_core::{CapturedLogs, ConfigError, InputError, RepositoryIdentity};
use preview_sync::SyncError;
use thiserror::Error;

use crate::queue::QueueError;
use crate::worker::WorkerError;

/// Error surface for the daemon runtime and its socket protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

/// Everything a build or sync request can fail with, as seen by the caller.
#[derive(Debug, Error)]
pub enum PreviewError {
    /// Missing or malformed identity, permalink or path. Nothing was touched.
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Page not found for permalink `{permalink}` in {repo}")]
    NotFound {
        repo: RepositoryIdentity,
        permalink: String,
    },

    #[error("page discovery failed: {message}")]
    Discovery { message: String, logs: CapturedLogs },

    #[error("build failed: {message}")]
    Build { message: String, logs: CapturedLogs },

    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("worker protocol error: {message}")]
    Protocol { message: String, logs: CapturedLogs },

    #[error("resource error: {0}")]
    Resource(String),
}

impl PreviewError {
    /// HTTP-style status for the caller: 404 for a missing page, 500 otherwise.
    pub fn status(&self) -> u16 {
        match self {
            PreviewError::NotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Diagnostic output captured from the worker, when there was one.
    pub fn logs(&self) -> Option<&CapturedLogs> {
        match self {
            PreviewError::Discovery { logs, .. }
            | PreviewError::Build { logs, .. }
            | PreviewError::Protocol { logs, .. } => Some(logs),
            _ => None,
        }
    }

    /// Translate a worker failure. `listing` selects discovery over build.
    pub(crate) fn from_worker(err: WorkerError, listing: bool) -> Self {
        let message = err.to_string();
        match err {
            WorkerError::MissingParameters(field) => InputError::Missing(field).into(),
            WorkerError::WorkerSpawn { .. } => PreviewError::Resource(message),
            WorkerError::ProtocolViolation { logs, .. } => PreviewError::Protocol { message, logs },
            WorkerError::WorkerExit { logs, .. } | WorkerError::Timeout { logs, .. } => {
                if listing {
                    PreviewError::Discovery { message, logs }
                } else {
                    PreviewError::Build { message, logs }
                }
            }
        }
    }
}

impl From<QueueError> for PreviewError {
    fn from(err: QueueError) -> Self {
        PreviewError::Resource(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_pages_are_404() {
        let repo = RepositoryIdentity::new("ownerX", "repoY").unwrap();
        let missing = PreviewError::NotFound {
            repo,
            permalink: "/zzz".into(),
        };
        assert_eq!(missing.status(), 404);
        assert!(missing.to_string().contains("/zzz"));

        assert_eq!(PreviewError::Input(InputError::Missing("owner")).status(), 500);
        assert_eq!(PreviewError::Resource("queue closed".into()).status(), 500);
    }

    #[test]
    fn worker_exit_maps_by_mode() {
        let exit = || WorkerError::WorkerExit {
            code: Some(1),
            logs: CapturedLogs {
                stdout: vec![],
                stderr: vec!["boom".into()],
            },
        };
        let listing = PreviewError::from_worker(exit(), true);
        assert!(matches!(listing, PreviewError::Discovery { .. }));
        assert_eq!(listing.logs().unwrap().stderr, vec!["boom".to_string()]);

        assert!(matches!(
            PreviewError::from_worker(exit(), false),
            PreviewError::Build { .. }
        ));
        assert!(matches!(
            PreviewError::from_worker(WorkerError::MissingParameters("template path"), false),
            PreviewError::Input(_)
        ));
    }
}
