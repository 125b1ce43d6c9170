//! On-disk layout.
//!
//! ```text
//! ~/.preview/
//!   config.yaml     (optional, every field has a default)
//!   preview.sock    (daemon socket, mode 0600)
//! <repos_root>/
//!   <owner>/<name>/ (one working copy per repository identity)
//! ```

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::RepositoryIdentity;

pub const CONFIG_FILE: &str = "config.yaml";
pub const DAEMON_SOCKET: &str = "preview.sock";

/// The invoking user's home directory, root of `~/.preview/`.
pub fn home_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

pub fn preview_root(home: &Path) -> PathBuf {
    home.join(".preview")
}

pub fn config_path(home: &Path) -> PathBuf {
    preview_root(home).join(CONFIG_FILE)
}

pub fn socket_path(home: &Path) -> PathBuf {
    preview_root(home).join(DAEMON_SOCKET)
}

/// `<repos_root>/<owner>/<name>`. Pure, no I/O.
pub fn working_copy_path(repos_root: &Path, identity: &RepositoryIdentity) -> PathBuf {
    repos_root.join(identity.owner()).join(identity.name())
}
