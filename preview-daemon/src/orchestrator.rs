//! Build Orchestrator: the entry point composing queue, workers, discovery
//! cache and sync coordinator.

use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use preview_core::{
    permalink, BuildRequest, BuildResult, BuildTask, InputError, PageDescriptor, PreviewConfig,
    RepositoryIdentity, SyncTrigger,
};
use preview_generator::invoke::is_template;
use preview_sync::{GitSync, SyncCoordinator, SyncOutcome, SyncReport, SyncState, WorkingCopySync};
use serde::{Deserialize, Serialize};

use crate::discovery::{CacheSummary, DiscoveryCache, PageSource};
use crate::error::{DaemonError, PreviewError};
use crate::queue::{QueueStats, TaskQueue};
use crate::worker::{ProcessLauncher, UnitLauncher, WorkerManager};

/// Transport-facing shape of a build outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<PageDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl BuildResponse {
    pub fn from_outcome(outcome: Result<BuildResult, PreviewError>) -> Self {
        let blank = |status| BuildResponse {
            status,
            content: None,
            pages: None,
            error: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        match outcome {
            Ok(BuildResult::Success { content }) => BuildResponse {
                content: Some(content),
                ..blank(200)
            },
            Ok(BuildResult::PageList { pages }) => BuildResponse {
                pages: Some(pages),
                ..blank(200)
            },
            Ok(BuildResult::Failure { status, error, logs }) => BuildResponse {
                error: Some(error),
                stdout: logs.display_stdout(),
                stderr: logs.display_stderr(),
                ..blank(status)
            },
            Err(err) => {
                let (stdout, stderr) = err
                    .logs()
                    .map(|logs| (logs.display_stdout(), logs.display_stderr()))
                    .unwrap_or_default();
                BuildResponse {
                    error: Some(err.to_string()),
                    stdout,
                    stderr,
                    ..blank(err.status())
                }
            }
        }
    }
}

/// Answer to a sync trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "sync", rename_all = "snake_case")]
pub enum SyncAck {
    /// Accepted; the sync runs in the background.
    Queued,
    /// Folded into a sync already in progress.
    Coalesced,
    Completed { outcome: SyncOutcome },
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub queue: QueueStats,
    pub cached: Vec<CacheSummary>,
    pub syncing: Vec<SyncingRepo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncingRepo {
    pub repo: String,
    pub state: SyncState,
}

/// Runs list-mode builds through the queue on behalf of the cache.
pub struct QueuedDiscovery<L> {
    queue: TaskQueue,
    workers: Arc<WorkerManager<L>>,
}

impl<L: UnitLauncher> QueuedDiscovery<L> {
    async fn list(&self, task: BuildTask) -> Result<Vec<PageDescriptor>, PreviewError> {
        match execute(&self.queue, &self.workers, task).await? {
            BuildResult::PageList { pages } => Ok(pages),
            BuildResult::Success { .. } => Err(PreviewError::Discovery {
                message: "generator returned a page body in list mode".into(),
                logs: Default::default(),
            }),
            BuildResult::Failure { error, logs, .. } => {
                Err(PreviewError::Discovery { message: error, logs })
            }
        }
    }
}

impl<L: UnitLauncher> PageSource for QueuedDiscovery<L> {
    async fn discover(
        &self,
        identity: &RepositoryIdentity,
        working_copy: &Path,
    ) -> Result<Vec<PageDescriptor>, PreviewError> {
        let task = BuildTask::list(identity.clone(), working_copy.to_path_buf(), None);
        self.list(task).await
    }
}

/// Submit `task` to the queue and run it in a fresh worker.
async fn execute<L: UnitLauncher>(
    queue: &TaskQueue,
    workers: &Arc<WorkerManager<L>>,
    task: BuildTask,
) -> Result<BuildResult, PreviewError> {
    let listing = task.is_list();
    let label = match &task.permalink {
        Some(permalink) => format!("build {} {permalink}", task.identity),
        None => format!("discover {}", task.identity),
    };
    let workers = workers.clone();
    let outcome = queue
        .submit(label, move || async move { workers.run(task).await })
        .await?;
    outcome.map_err(|err| PreviewError::from_worker(err, listing))
}

struct Shared<L, S> {
    config: Arc<PreviewConfig>,
    queue: TaskQueue,
    workers: Arc<WorkerManager<L>>,
    cache: DiscoveryCache<QueuedDiscovery<L>>,
    syncs: SyncCoordinator<S>,
    started_at: DateTime<Utc>,
}

/// Process-scoped preview state. Cheap to clone; all clones share state.
pub struct BuildOrchestrator<L = ProcessLauncher, S = GitSync> {
    shared: Arc<Shared<L, S>>,
}

impl<L, S> Clone for BuildOrchestrator<L, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl BuildOrchestrator {
    /// Orchestrator with child-process workers and git-backed syncs.
    pub fn from_config(config: PreviewConfig) -> Result<Self, DaemonError> {
        config.validate()?;
        let launcher = ProcessLauncher::from_config(&config)?;
        let sync = GitSync::new(config.clone());
        Ok(Self::with_parts(config, launcher, sync))
    }
}

impl<L: UnitLauncher, S: WorkingCopySync> BuildOrchestrator<L, S> {
    /// Must be called from within a tokio runtime.
    pub fn with_parts(config: PreviewConfig, launcher: L, sync: S) -> Self {
        let config = Arc::new(config);
        let queue = TaskQueue::new(config.concurrency, config.task_timeout());
        let workers = Arc::new(WorkerManager::new(
            launcher,
            config.generator.clone(),
            config.build_timeout(),
        ));
        let cache = DiscoveryCache::new(QueuedDiscovery {
            queue: queue.clone(),
            workers: workers.clone(),
        });
        Self {
            shared: Arc::new(Shared {
                config,
                queue,
                workers,
                cache,
                syncs: SyncCoordinator::new(sync),
                started_at: Utc::now(),
            }),
        }
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.shared.config
    }

    pub fn cache(&self) -> &DiscoveryCache<QueuedDiscovery<L>> {
        &self.shared.cache
    }

    pub fn syncs(&self) -> &SyncCoordinator<S> {
        &self.shared.syncs
    }

    /// Build one page.
    pub async fn build(&self, request: BuildRequest) -> Result<BuildResult, PreviewError> {
        let started = Instant::now();
        let identity = RepositoryIdentity::new(request.owner, request.name)?;
        if request.permalink.trim().is_empty() {
            return Err(InputError::Missing("permalink").into());
        }
        let (mut wanted, extra_variables) = permalink::split_variables(&request.permalink);
        if wanted.is_empty() {
            wanted.push('/');
        }

        let working_copy = request
            .working_copy
            .unwrap_or_else(|| self.shared.config.working_copy(&identity));
        let template = match request.template_path {
            Some(template) => template,
            None => {
                self.shared
                    .cache
                    .resolve_template(&identity, &working_copy, &wanted)
                    .await?
            }
        };

        let task = BuildTask {
            identity: identity.clone(),
            working_copy: working_copy.clone(),
            template_path: Some(template),
            permalink: Some(wanted.clone()),
            extra_variables,
        };
        let result = execute(&self.shared.queue, &self.shared.workers, task).await;

        match &result {
            Ok(BuildResult::PageList { pages }) => {
                self.shared
                    .cache
                    .populate(&identity, &working_copy, pages.clone())
            }
            Ok(built) => tracing::info!(
                repo = %identity,
                permalink = %wanted,
                status = built.status(),
                duration_ms = started.elapsed().as_millis() as u64,
                "build finished"
            ),
            Err(err) => tracing::warn!(
                repo = %identity,
                permalink = %wanted,
                error = %err,
                duration_ms = started.elapsed().as_millis() as u64,
                "build failed"
            ),
        }
        result
    }

    /// Trigger a sync. Acknowledged once queued unless `wait` is set.
    pub async fn sync(&self, trigger: SyncTrigger, wait: bool) -> Result<SyncAck, PreviewError> {
        let identity = trigger.identity()?;
        if let Some(hint) = &trigger.discover {
            validate_hint(hint)?;
        }

        let this = self.clone();
        let job = async move { this.run_sync(identity, trigger.discover).await };
        if wait {
            return job.await;
        }
        tokio::spawn(async move {
            // background syncs have no caller left to report to
            let _ = job.await;
        });
        Ok(SyncAck::Queued)
    }

    async fn run_sync(
        &self,
        identity: RepositoryIdentity,
        discover: Option<String>,
    ) -> Result<SyncAck, PreviewError> {
        let started = Instant::now();
        let syncs = self.shared.syncs.clone();
        let id = identity.clone();
        let submitted = self
            .shared
            .queue
            .submit(format!("sync {identity}"), move || async move {
                syncs.trigger(&id).await
            })
            .await;

        let report = match submitted {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => {
                tracing::warn!(repo = %identity, error = %err, "sync failed");
                return Err(err.into());
            }
            Err(err) => {
                tracing::warn!(repo = %identity, error = %err, "sync could not run");
                return Err(err.into());
            }
        };

        match report {
            SyncReport::Coalesced => Ok(SyncAck::Coalesced),
            SyncReport::Completed(outcome) => {
                tracing::info!(
                    repo = %identity,
                    head = %outcome.head(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "sync finished"
                );
                self.refresh_after_sync(&identity, discover.as_deref()).await;
                Ok(SyncAck::Completed { outcome })
            }
        }
    }

    /// Repopulate the cache from the hinted templates, or drop the entry.
    ///
    /// Runs after the sync released its queue slot so the list builds can
    /// be admitted even with a concurrency limit of one.
    async fn refresh_after_sync(&self, identity: &RepositoryIdentity, hint: Option<&str>) {
        let Some(hint) = hint else {
            self.shared.cache.invalidate(identity);
            return;
        };

        let working_copy = self.shared.config.working_copy(identity);
        let listing = {
            let working_copy = working_copy.clone();
            let hint = hint.to_string();
            tokio::task::spawn_blocking(move || hinted_templates(&working_copy, &hint)).await
        };
        let templates = match listing.map_err(std::io::Error::other).and_then(|found| found) {
            Ok(templates) => templates,
            Err(err) => {
                tracing::warn!(repo = %identity, hint, error = %err, "cannot read discover directory");
                self.shared.cache.invalidate(identity);
                return;
            }
        };

        let mut pages = Vec::new();
        for template in templates {
            let task = BuildTask::list(identity.clone(), working_copy.clone(), Some(template));
            match execute(&self.shared.queue, &self.shared.workers, task).await {
                Ok(BuildResult::PageList { pages: found }) => pages.extend(found),
                Ok(other) => tracing::warn!(
                    repo = %identity,
                    status = other.status(),
                    "template listing returned no pages"
                ),
                Err(err) => tracing::warn!(repo = %identity, error = %err, "template listing failed"),
            }
        }

        if pages.is_empty() {
            self.shared.cache.invalidate(identity);
        } else {
            tracing::info!(repo = %identity, pages = pages.len(), "discovery cache repopulated");
            self.shared.cache.invalidate(identity);
            self.shared.cache.populate(identity, &working_copy, pages);
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let started_at = self.shared.started_at;
        StatusSnapshot {
            started_at,
            uptime_secs: (Utc::now() - started_at).num_seconds().max(0) as u64,
            queue: self.shared.queue.stats(),
            cached: self.shared.cache.summary(),
            syncing: self
                .shared
                .syncs
                .active()
                .into_iter()
                .map(|(repo, state)| SyncingRepo {
                    repo: repo.to_string(),
                    state,
                })
                .collect(),
        }
    }
}

fn validate_hint(hint: &str) -> Result<(), InputError> {
    let escapes = Path::new(hint)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(InputError::Invalid {
            field: "discover",
            reason: format!("{hint:?} must stay inside the working copy"),
        });
    }
    Ok(())
}

/// `*.html` files directly inside `<working_copy>/<hint>`, relative to the
/// working copy and sorted.
fn hinted_templates(working_copy: &Path, hint: &str) -> std::io::Result<Vec<String>> {
    let dir = working_copy.join(hint);
    let mut templates = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.is_file() && is_template(&path) {
            if let Ok(relative) = path.strip_prefix(working_copy) {
                templates.push(relative.to_string_lossy().into_owned());
            }
        }
    }
    templates.sort();
    Ok(templates)
}
