//! Page Discovery Cache.
//!
//! Maps a repository, as checked out in one working copy, to the pages its
//! generator can produce. Hits are served immediately and schedule one
//! background refresh per entry; misses discover synchronously. Entries are
//! replaced wholesale, never edited.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use preview_core::{permalink, PageDescriptor, RepositoryIdentity};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::PreviewError;

/// Lists every page the working copy of a repository can currently produce.
pub trait PageSource: Send + Sync + 'static {
    fn discover(
        &self,
        identity: &RepositoryIdentity,
        working_copy: &Path,
    ) -> impl Future<Output = Result<Vec<PageDescriptor>, PreviewError>> + Send;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    pages: Arc<Vec<PageDescriptor>>,
    discovered_at: DateTime<Utc>,
}

/// Entries are per working copy: a build against an explicit working copy
/// never sees pages discovered in another tree.
type Key = (RepositoryIdentity, PathBuf);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub repo: String,
    pub working_copy: PathBuf,
    pub pages: usize,
    pub discovered_at: DateTime<Utc>,
    pub refreshing: bool,
}

struct Inner<P> {
    source: P,
    entries: RwLock<HashMap<Key, CacheEntry>>,
    refreshing: Mutex<HashMap<Key, JoinHandle<()>>>,
}

pub struct DiscoveryCache<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for DiscoveryCache<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: PageSource> DiscoveryCache<P> {
    pub fn new(source: P) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                entries: RwLock::new(HashMap::new()),
                refreshing: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Template path producing `permalink` in `identity`'s site as checked
    /// out at `working_copy`.
    pub async fn resolve_template(
        &self,
        identity: &RepositoryIdentity,
        working_copy: &Path,
        permalink: &str,
    ) -> Result<String, PreviewError> {
        let key = (identity.clone(), working_copy.to_path_buf());
        let wanted = permalink::normalize(permalink);
        if let Some(template) = self.lookup(&key, wanted) {
            tracing::debug!(repo = %identity, permalink = wanted, "discovery cache hit");
            self.schedule_refresh(&key);
            return Ok(template);
        }

        tracing::info!(repo = %identity, permalink = wanted, "discovery cache miss, discovering");
        let pages = self.inner.source.discover(identity, working_copy).await?;
        self.populate(identity, working_copy, pages);

        self.lookup(&key, wanted)
            .ok_or_else(|| PreviewError::NotFound {
                repo: identity.clone(),
                permalink: permalink.to_string(),
            })
    }

    /// Replace the entry for `identity` at `working_copy`.
    pub fn populate(
        &self,
        identity: &RepositoryIdentity,
        working_copy: &Path,
        pages: Vec<PageDescriptor>,
    ) {
        tracing::debug!(repo = %identity, pages = pages.len(), "discovery cache updated");
        let entry = CacheEntry {
            pages: Arc::new(pages),
            discovered_at: Utc::now(),
        };
        self.entries_mut()
            .insert((identity.clone(), working_copy.to_path_buf()), entry);
    }

    /// Drop every entry of `identity`, whichever working copy it came from.
    pub fn invalidate(&self, identity: &RepositoryIdentity) {
        let mut entries = self.entries_mut();
        let before = entries.len();
        entries.retain(|(id, _), _| id != identity);
        if entries.len() != before {
            tracing::debug!(repo = %identity, "discovery cache entries invalidated");
        }
    }

    pub fn pages(
        &self,
        identity: &RepositoryIdentity,
        working_copy: &Path,
    ) -> Option<Arc<Vec<PageDescriptor>>> {
        self.entries()
            .get(&(identity.clone(), working_copy.to_path_buf()))
            .map(|entry| entry.pages.clone())
    }

    pub fn summary(&self) -> Vec<CacheSummary> {
        let refreshing = self.refreshing();
        let mut rows: Vec<_> = self
            .entries()
            .iter()
            .map(|(key, entry)| CacheSummary {
                repo: key.0.to_string(),
                working_copy: key.1.clone(),
                pages: entry.pages.len(),
                discovered_at: entry.discovered_at,
                refreshing: refreshing
                    .get(key)
                    .is_some_and(|handle| !handle.is_finished()),
            })
            .collect();
        rows.sort_by(|a, b| (&a.repo, &a.working_copy).cmp(&(&b.repo, &b.working_copy)));
        rows
    }

    /// Wait for the in-flight refresh of `identity` at `working_copy`, if any.
    pub async fn wait_for_refresh(&self, identity: &RepositoryIdentity, working_copy: &Path) {
        let handle = self
            .refreshing()
            .remove(&(identity.clone(), working_copy.to_path_buf()));
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(repo = %identity, error = %err, "discovery refresh task failed");
            }
        }
    }

    fn lookup(&self, key: &Key, wanted: &str) -> Option<String> {
        let entries = self.entries();
        entries
            .get(key)?
            .pages
            .iter()
            .find(|page| page.normalized_url() == wanted)
            .map(|page| page.template_path.clone())
    }

    /// Start a background refresh unless one is already running.
    fn schedule_refresh(&self, key: &Key) {
        let mut refreshing = self.refreshing();
        if refreshing
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }

        let cache = self.clone();
        let (id, working_copy) = key.clone();
        let handle = tokio::spawn(async move {
            match cache.inner.source.discover(&id, &working_copy).await {
                Ok(pages) => cache.populate(&id, &working_copy, pages),
                Err(err) => {
                    tracing::warn!(repo = %id, error = %err, "background discovery failed, keeping stale entry")
                }
            }
            cache.refreshing().remove(&(id, working_copy));
        });
        refreshing.insert(key.clone(), handle);
    }

    fn entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Key, CacheEntry>> {
        self.inner.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries_mut(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<Key, CacheEntry>> {
        self.inner.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn refreshing(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<Key, JoinHandle<()>>> {
        self.inner.refreshing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
