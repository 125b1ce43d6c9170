//! Git-backed working-copy sync.
//!
//! One call brings `<repos_root>/<owner>/<name>` to the tip of the configured
//! branch: clone when absent, fetch + hard reset when present, and reinstall
//! dependencies only when the manifest fingerprint moved.

use std::future::Future;
use std::path::{Path, PathBuf};

use preview_core::{PreviewConfig, RepositoryIdentity};
use serde::Serialize;

use crate::command;
use crate::error::{io_err, SyncError};
use crate::manifest;

/// What a completed sync did to the working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncOutcome {
    Cloned { head: String },
    Updated {
        from: String,
        to: String,
        reinstalled: bool,
    },
}

impl SyncOutcome {
    pub fn head(&self) -> &str {
        match self {
            SyncOutcome::Cloned { head } => head,
            SyncOutcome::Updated { to, .. } => to,
        }
    }
}

/// Brings one repository's working copy up to date.
///
/// The coordinator only ever drives one call per identity at a time.
pub trait WorkingCopySync: Send + Sync + 'static {
    fn sync(
        &self,
        identity: &RepositoryIdentity,
    ) -> impl Future<Output = Result<SyncOutcome, SyncError>> + Send;
}

/// [`WorkingCopySync`] backed by the `git` CLI and the configured installer.
#[derive(Debug, Clone)]
pub struct GitSync {
    config: PreviewConfig,
}

impl GitSync {
    pub fn new(config: PreviewConfig) -> Self {
        Self { config }
    }

    pub fn working_copy(&self, identity: &RepositoryIdentity) -> PathBuf {
        self.config.working_copy(identity)
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<String, SyncError> {
        let out = command::run("git", args, cwd, self.config.command_timeout()).await?;
        Ok(out.stdout.trim().to_string())
    }

    /// Succeeds only if `path` is the top level of a git checkout.
    async fn verify_checkout(&self, path: &Path) -> Result<(), SyncError> {
        let not_a_repo = || SyncError::NotAGitRepository {
            path: path.to_path_buf(),
        };
        let top = match self.git(path, &["rev-parse", "--show-toplevel"]).await {
            Ok(top) => top,
            Err(SyncError::CommandFailed { .. }) => return Err(not_a_repo()),
            Err(e) => return Err(e),
        };
        let top = Path::new(&top);
        let top = tokio::fs::canonicalize(top).await.map_err(|e| io_err(top, e))?;
        let here = tokio::fs::canonicalize(path).await.map_err(|e| io_err(path, e))?;
        if top != here {
            return Err(not_a_repo());
        }
        Ok(())
    }

    async fn clone(&self, identity: &RepositoryIdentity, path: &Path) -> Result<String, SyncError> {
        let Some(parent) = path.parent() else {
            return Err(io_err(path, std::io::Error::other("working copy has no parent")));
        };
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;

        let url = self.config.remote_url_for(identity);
        let target = path.to_string_lossy();
        tracing::info!(repo = %identity, url = %url, "cloning");
        self.git(
            parent,
            &["clone", "--branch", &self.config.branch, &url, &target],
        )
        .await?;
        self.install(path).await?;
        self.git(path, &["rev-parse", "HEAD"]).await
    }

    async fn update(&self, identity: &RepositoryIdentity, path: &Path) -> Result<SyncOutcome, SyncError> {
        let from = self.git(path, &["rev-parse", "HEAD"]).await?;
        tracing::info!(repo = %identity, branch = %self.config.branch, "fetching");
        self.git(path, &["fetch", "origin", &self.config.branch]).await?;
        self.git(path, &["reset", "--hard", "FETCH_HEAD"]).await?;
        let to = self.git(path, &["rev-parse", "HEAD"]).await?;

        let manifests = self.config.dependency_manifests.clone();
        let reinstalled = off_runtime(path, move |path| {
            let current = manifest::fingerprint(path, &manifests)?;
            Ok(manifest::load(path)?.as_deref() != Some(current.as_str()))
        })
        .await?;
        if reinstalled {
            tracing::info!(repo = %identity, "dependency manifests changed, reinstalling");
            self.install(path).await?;
        } else {
            tracing::debug!(repo = %identity, "dependency manifests unchanged");
        }
        Ok(SyncOutcome::Updated {
            from,
            to,
            reinstalled,
        })
    }

    /// Run the install command and record the fingerprint it installed.
    async fn install(&self, path: &Path) -> Result<(), SyncError> {
        if let Some((program, args)) = self.config.install_command.split_first() {
            command::run(program, args, path, self.config.command_timeout()).await?;
        }
        let manifests = self.config.dependency_manifests.clone();
        off_runtime(path, move |path| {
            let digest = manifest::fingerprint(path, &manifests)?;
            manifest::save(path, &digest)
        })
        .await
    }
}

/// Run blocking filesystem work for `path` on tokio's blocking pool.
async fn off_runtime<T, F>(path: &Path, work: F) -> Result<T, SyncError>
where
    T: Send + 'static,
    F: FnOnce(&Path) -> Result<T, SyncError> + Send + 'static,
{
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || work(&owned))
        .await
        .map_err(|e| io_err(path, std::io::Error::other(e)))?
}

impl WorkingCopySync for GitSync {
    async fn sync(&self, identity: &RepositoryIdentity) -> Result<SyncOutcome, SyncError> {
        let path = self.working_copy(identity);

        if tokio::fs::metadata(&path).await.is_ok() {
            match self.verify_checkout(&path).await {
                Ok(()) => return self.update(identity, &path).await,
                Err(SyncError::NotAGitRepository { .. }) => {
                    tracing::warn!(
                        repo = %identity,
                        path = %path.display(),
                        "working copy is not a git checkout, re-cloning"
                    );
                    tokio::fs::remove_dir_all(&path)
                        .await
                        .map_err(|e| io_err(&path, e))?;
                }
                Err(e) => return Err(e),
            }
        }

        let head = self.clone(identity, &path).await?;
        Ok(SyncOutcome::Cloned { head })
    }
}
