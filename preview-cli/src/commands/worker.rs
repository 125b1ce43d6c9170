//! `preview worker`: one isolated build, spoken over stdin/stdout.
//!
//! stdout carries protocol messages only; tracing goes to stderr where the
//! daemon captures it.

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing_subscriber::{fmt, EnvFilter};

pub fn run() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start worker runtime")?;
    runtime.block_on(async {
        let mut stdout = tokio::io::stdout();
        preview_generator::worker::serve(BufReader::new(tokio::io::stdin()), &mut stdout)
            .await
            .context("worker exchange failed")
    })
}
