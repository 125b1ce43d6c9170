//! Worker message protocol.
//!
//! A worker writes newline-terminated messages on its stdout, each prefixed
//! with [`MESSAGE_PREFIX`] and followed by one JSON object tagged by `type`.
//! Every other stdout line is diagnostic output. The exchange is fixed:
//!
//! ```text
//! worker        → ::preview::{"type":"ready"}
//! orchestrator  → {"task":{...},"generator":{...}}        (one line on stdin)
//! worker        → ::preview::{"type":"response","status":200,"content":"..."}
//! ```

use preview_core::{BuildResult, BuildTask, CapturedLogs, GeneratorConfig, PageDescriptor};
use serde::{Deserialize, Serialize};

pub const MESSAGE_PREFIX: &str = "::preview::";

/// The single request a worker receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task: BuildTask,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready,
    Response(WorkerResponse),
}

/// The single response a worker sends. Exactly one of `content`, `pages` or
/// `error` is set; see [`WorkerResponse::into_result`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<PageDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            status: 200,
            content: Some(content.into()),
            pages: None,
            error: None,
        }
    }

    pub fn pages(pages: Vec<PageDescriptor>) -> Self {
        Self {
            status: 200,
            content: None,
            pages: Some(pages),
            error: None,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            content: None,
            pages: None,
            error: Some(message.into()),
        }
    }

    /// Map the response onto a [`BuildResult`], attaching `logs` to failures.
    ///
    /// Any combination other than `{200, content}`, `{200, pages}` or
    /// `{4xx/5xx, error}` is rejected and handed back unchanged.
    pub fn into_result(self, logs: CapturedLogs) -> Result<BuildResult, WorkerResponse> {
        match (self.status, &self.content, &self.pages, &self.error) {
            (200, Some(_), None, None) => Ok(BuildResult::Success {
                content: self.content.unwrap_or_default(),
            }),
            (200, None, Some(_), None) => Ok(BuildResult::PageList {
                pages: self.pages.unwrap_or_default(),
            }),
            (400..=599, None, None, Some(_)) => Ok(BuildResult::Failure {
                status: self.status,
                error: self.error.unwrap_or_default(),
                logs,
            }),
            _ => Err(self),
        }
    }
}

/// Encode one message as a protocol line (without the trailing newline).
pub fn encode(message: &WorkerMessage) -> Result<String, serde_json::Error> {
    Ok(format!("{MESSAGE_PREFIX}{}", serde_json::to_string(message)?))
}

/// Decode a stdout line. `None` means the line is diagnostic output, not a
/// protocol message.
pub fn decode(line: &str) -> Option<Result<WorkerMessage, serde_json::Error>> {
    line.strip_prefix(MESSAGE_PREFIX)
        .map(|payload| serde_json::from_str(payload.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_line_is_prefixed_json() {
        let line = encode(&WorkerMessage::Ready).unwrap();
        assert_eq!(line, r#"::preview::{"type":"ready"}"#);
        assert_eq!(decode(&line).unwrap().unwrap(), WorkerMessage::Ready);
    }

    #[test]
    fn plain_lines_are_not_messages() {
        assert!(decode("[11ty] Writing _site/index.html").is_none());
    }

    #[test]
    fn unknown_message_type_fails_to_decode() {
        let decoded = decode(r#"::preview::{"type":"progress","percent":50}"#).unwrap();
        assert!(decoded.is_err());
    }

    #[test]
    fn response_shapes_map_to_build_results() {
        let ok = WorkerResponse::content("<h1>hi</h1>")
            .into_result(CapturedLogs::default())
            .unwrap();
        assert_eq!(ok, BuildResult::Success { content: "<h1>hi</h1>".into() });

        let listed = WorkerResponse::pages(vec![PageDescriptor::from_generated("/a/", "./a.html")])
            .into_result(CapturedLogs::default())
            .unwrap();
        assert!(matches!(listed, BuildResult::PageList { ref pages } if pages.len() == 1));

        let missing = WorkerResponse::error(404, "not found")
            .into_result(CapturedLogs::default())
            .unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        let both = WorkerResponse {
            status: 200,
            content: Some("x".into()),
            pages: Some(vec![]),
            error: None,
        };
        assert!(both.into_result(CapturedLogs::default()).is_err());

        let ok_with_error = WorkerResponse {
            status: 200,
            content: None,
            pages: None,
            error: Some("?".into()),
        };
        assert!(ok_with_error.into_result(CapturedLogs::default()).is_err());
    }
}
