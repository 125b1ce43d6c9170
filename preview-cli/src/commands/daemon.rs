//! `preview serve` / `preview stop`: daemon lifecycle.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use preview_core::PreviewConfig;
use preview_daemon::{request_stop, start_blocking, DaemonError};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Config file to use instead of ~/.preview/config.yaml.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ServeArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let config = match &self.config {
            Some(path) => PreviewConfig::load_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => PreviewConfig::load_at(&home).context("failed to load config")?,
        };
        start_blocking(&home, config).context("daemon exited with error")
    }
}

pub fn stop() -> Result<()> {
    let home = super::home_dir()?;
    match request_stop(&home) {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}
