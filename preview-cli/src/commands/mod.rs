pub mod build;
pub mod daemon;
pub mod status;
pub mod sync;
pub mod worker;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home_dir() -> Result<PathBuf> {
    preview_core::paths::home_dir().context("could not locate ~/.preview")
}
