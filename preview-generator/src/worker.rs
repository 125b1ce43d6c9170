//! Worker-side entry point.
//!
//! A worker lives for exactly one build: it announces itself, reads one
//! [`WorkerRequest`] line, runs the generator and answers with one
//! [`WorkerResponse`]. Only protocol lines go to `output`; logs go to stderr.

use preview_core::PageDescriptor;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::GeneratorError;
use crate::invoke;
use crate::protocol::{self, WorkerMessage, WorkerRequest, WorkerResponse};

pub const BUILD_FAILED: &str = "There was an error building this page";
pub const MISSING_PARAMETERS: &str = "Missing required parameters";

/// Run one request/response exchange over `input`/`output`.
pub async fn serve<R, W>(input: R, output: &mut W) -> Result<(), GeneratorError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send(output, &WorkerMessage::Ready).await?;

    let mut lines = input.lines();
    let line = lines
        .next_line()
        .await
        .map_err(GeneratorError::Channel)?
        .ok_or(GeneratorError::NoRequest)?;

    let response = match serde_json::from_str::<WorkerRequest>(&line) {
        Ok(request) => handle(request).await,
        Err(err) => {
            tracing::error!(error = %err, "malformed worker request");
            WorkerResponse::error(500, format!("{MISSING_PARAMETERS}: {err}"))
        }
    };

    send(output, &WorkerMessage::Response(response)).await
}

/// Turn one request into its response. Never fails: generator errors become
/// 500 responses carrying the error text.
pub async fn handle(request: WorkerRequest) -> WorkerResponse {
    let task = &request.task;
    if task.working_copy.as_os_str().is_empty()
        || task.identity.owner().is_empty()
        || task.identity.name().is_empty()
    {
        tracing::error!("worker request is missing required parameters");
        return WorkerResponse::error(500, MISSING_PARAMETERS);
    }

    let pages = match invoke::run(task, &request.generator).await {
        Ok(pages) => pages,
        Err(err) => {
            tracing::error!(
                repository = %task.identity,
                permalink = ?task.permalink,
                error = %err,
                "generator failed",
            );
            return WorkerResponse::error(500, format!("{BUILD_FAILED}: {err}"));
        }
    };

    let Some(wanted) = task.permalink.as_deref() else {
        let descriptors: Vec<PageDescriptor> =
            pages.iter().map(invoke::GeneratedPage::descriptor).collect();
        tracing::info!(repository = %task.identity, pages = descriptors.len(), "pages listed");
        return WorkerResponse::pages(descriptors);
    };

    match invoke::select(&pages, wanted) {
        Some(page) => match &page.content {
            Some(content) => WorkerResponse::content(content.clone()),
            None => WorkerResponse::error(
                404,
                format!("Page `{wanted}` was found but the generator produced no content for it"),
            ),
        },
        None => {
            let found: Vec<&str> = pages.iter().map(|page| page.url.as_str()).collect();
            WorkerResponse::error(
                404,
                format!(
                    "Page not found for permalink `{wanted}` with template `{}`. Found pages: {}",
                    task.template_path.as_deref().unwrap_or("(all)"),
                    found.join(", "),
                ),
            )
        }
    }
}

async fn send<W>(output: &mut W, message: &WorkerMessage) -> Result<(), GeneratorError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = protocol::encode(message)?;
    line.push('\n');
    output
        .write_all(line.as_bytes())
        .await
        .map_err(GeneratorError::Channel)?;
    output.flush().await.map_err(GeneratorError::Channel)
}
