//! Error types for preview-generator.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while running the site generator or talking
/// to the orchestrator from inside a worker.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("failed to spawn generator `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("generator did not finish within {secs}s")]
    Timeout { secs: u64 },

    #[error("generator exited with status {}", display_code(.code))]
    Exit { code: Option<i32> },

    #[error("generator output contains no page list")]
    NoPageList,

    #[error("generator produced no pages")]
    NoPages,

    #[error("generator output is not a valid page list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker channel error: {0}")]
    Channel(#[source] std::io::Error),

    #[error("orchestrator closed the channel before sending a request")]
    NoRequest,
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "unknown (killed by signal)".to_string())
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> GeneratorError {
    GeneratorError::Io {
        path: path.into(),
        source,
    }
}
