//! Per-repository sync coalescing.
//!
//! Each identity is idle (absent from the map), syncing, or syncing with one
//! retry pending. Triggers that arrive while a sync runs collapse into that
//! single retry, which runs as soon as the current pass finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use preview_core::RepositoryIdentity;
use serde::Serialize;

use crate::error::SyncError;
use crate::git::{SyncOutcome, WorkingCopySync};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Syncing,
    SyncingWithPendingRetry,
}

/// What a single trigger resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncReport {
    /// This trigger ran the sync; carries the first pass's outcome.
    Completed(SyncOutcome),
    /// A sync was already running; it will run once more on our behalf.
    Coalesced,
}

type StateMap = Mutex<HashMap<RepositoryIdentity, SyncState>>;

struct Inner<S> {
    runner: S,
    states: StateMap,
}

/// Ensures at most one sync per repository is ever in progress.
pub struct SyncCoordinator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SyncCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: WorkingCopySync> SyncCoordinator<S> {
    pub fn new(runner: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn runner(&self) -> &S {
        &self.inner.runner
    }

    /// Run (or coalesce into) a sync for `identity`.
    ///
    /// The caller that starts the sync gets the first pass's result. Any
    /// retry requested meanwhile runs before this returns, and its failure is
    /// only logged. Dropping the returned future resets the identity to idle.
    ///
    /// The retry runs inside the caller's future, so a deadline wrapped
    /// around `trigger` (the queue's task timeout) also bounds the retry. If
    /// it expires during the retry the caller sees the timeout, not the first
    /// pass's result, even though that pass finished.
    pub async fn trigger(&self, identity: &RepositoryIdentity) -> Result<SyncReport, SyncError> {
        if !self.begin(identity) {
            tracing::info!(repo = %identity, "sync already running, retry queued");
            return Ok(SyncReport::Coalesced);
        }
        let mut guard = IdleOnDrop {
            states: &self.inner.states,
            identity,
            armed: true,
        };

        let result = self.inner.runner.sync(identity).await;
        log_pass(identity, &result);

        while self.take_retry(identity) {
            tracing::info!(repo = %identity, "re-running sync requested during previous pass");
            let retry = self.inner.runner.sync(identity).await;
            log_pass(identity, &retry);
        }
        guard.armed = false;

        result.map(SyncReport::Completed)
    }

    /// Current state, `None` meaning idle.
    pub fn state(&self, identity: &RepositoryIdentity) -> Option<SyncState> {
        lock(&self.inner.states).get(identity).copied()
    }

    /// Every repository with a sync in progress, sorted by identity.
    pub fn active(&self) -> Vec<(RepositoryIdentity, SyncState)> {
        let mut active: Vec<_> = lock(&self.inner.states)
            .iter()
            .map(|(id, state)| (id.clone(), *state))
            .collect();
        active.sort();
        active
    }

    /// Idle → Syncing returns true; otherwise records a pending retry.
    fn begin(&self, identity: &RepositoryIdentity) -> bool {
        let mut states = lock(&self.inner.states);
        match states.get_mut(identity) {
            None => {
                states.insert(identity.clone(), SyncState::Syncing);
                true
            }
            Some(state) => {
                *state = SyncState::SyncingWithPendingRetry;
                false
            }
        }
    }

    /// Consume a pending retry, or go idle when there is none.
    fn take_retry(&self, identity: &RepositoryIdentity) -> bool {
        let mut states = lock(&self.inner.states);
        match states.get_mut(identity) {
            Some(state @ SyncState::SyncingWithPendingRetry) => {
                *state = SyncState::Syncing;
                true
            }
            _ => {
                states.remove(identity);
                false
            }
        }
    }
}

fn lock(states: &StateMap) -> MutexGuard<'_, HashMap<RepositoryIdentity, SyncState>> {
    states.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_pass(identity: &RepositoryIdentity, result: &Result<SyncOutcome, SyncError>) {
    match result {
        Ok(outcome) => tracing::info!(repo = %identity, head = %outcome.head(), "sync complete"),
        Err(err) => tracing::warn!(repo = %identity, error = %err, "sync failed"),
    }
}

/// Resets an identity to idle if its sync is cancelled mid-flight.
struct IdleOnDrop<'a> {
    states: &'a StateMap,
    identity: &'a RepositoryIdentity,
    armed: bool,
}

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(repo = %self.identity, "sync cancelled, resetting to idle");
            lock(self.states).remove(self.identity);
        }
    }
}
