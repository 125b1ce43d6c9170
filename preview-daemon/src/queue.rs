//! Bounded-concurrency task queue.
//!
//! Submissions are handed to a single dispatcher in call order; the
//! dispatcher waits for one of `limit` permits before starting each task, so
//! admission is FIFO while completion order is free. Every admitted task runs
//! under the queue timeout. On timeout the task's future is dropped, which is
//! how process-owning tasks get their `kill_on_drop` children reaped.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task `{label}` timed out after {secs}s")]
    Timeout { label: String, secs: u64 },

    #[error("task queue is shut down")]
    Closed,

    #[error("task `{label}` panicked")]
    Panicked { label: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub limit: usize,
    pub running: usize,
    pub waiting: usize,
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
struct Counters {
    running: AtomicUsize,
    waiting: AtomicUsize,
}

#[derive(Clone)]
pub struct TaskQueue {
    jobs: mpsc::UnboundedSender<Job>,
    counters: Arc<Counters>,
    limit: usize,
    timeout: Duration,
}

impl TaskQueue {
    /// Must be called from within a tokio runtime; spawns the dispatcher.
    pub fn new(limit: usize, timeout: Duration) -> Self {
        let limit = limit.max(1);
        let (jobs, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        tokio::spawn(dispatch(rx, Arc::new(Semaphore::new(limit)), counters.clone()));
        Self {
            jobs,
            counters,
            limit,
            timeout,
        }
    }

    /// Enqueue `task` now and return a future for its result.
    ///
    /// The position in the queue is taken when this is called, not when the
    /// returned future is first polled.
    pub fn submit<T, F, Fut>(
        &self,
        label: impl Into<String>,
        task: F,
    ) -> impl Future<Output = Result<T, QueueError>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let label = label.into();
        let timeout = self.timeout;
        let (tx, rx) = oneshot::channel();

        let job_label = label.clone();
        let job: Job = Box::pin(async move {
            let handle = tokio::spawn(tokio::time::timeout(timeout, task()));
            let result = match handle.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_elapsed)) => {
                    tracing::warn!(task = %job_label, secs = timeout.as_secs(), "task timed out");
                    Err(QueueError::Timeout {
                        label: job_label,
                        secs: timeout.as_secs(),
                    })
                }
                Err(err) if err.is_panic() => {
                    tracing::error!(task = %job_label, "task panicked");
                    Err(QueueError::Panicked { label: job_label })
                }
                Err(_) => Err(QueueError::Closed),
            };
            let _ = tx.send(result);
        });

        self.counters.waiting.fetch_add(1, Ordering::SeqCst);
        let sent = self.jobs.send(job).is_ok();
        if !sent {
            self.counters.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        tracing::debug!(task = %label, "task queued");

        async move {
            if !sent {
                return Err(QueueError::Closed);
            }
            rx.await.unwrap_or(Err(QueueError::Closed))
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            limit: self.limit,
            running: self.counters.running.load(Ordering::SeqCst),
            waiting: self.counters.waiting.load(Ordering::SeqCst),
        }
    }
}

async fn dispatch(
    mut jobs: mpsc::UnboundedReceiver<Job>,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
) {
    while let Some(job) = jobs.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        counters.waiting.fetch_sub(1, Ordering::SeqCst);
        counters.running.fetch_add(1, Ordering::SeqCst);
        let counters = counters.clone();
        tokio::spawn(async move {
            job.await;
            counters.running.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_limit_under_pressure() {
        let queue = TaskQueue::new(3, Duration::from_secs(60));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let pending: Vec<_> = (0..30)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                queue.submit(format!("t{i}"), move || async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        for (i, fut) in pending.into_iter().enumerate() {
            assert_eq!(fut.await.unwrap(), i);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn admission_is_fifo() {
        let queue = TaskQueue::new(1, Duration::from_secs(60));
        let order = Arc::new(Mutex::new(Vec::new()));

        let pending: Vec<_> = (0..6)
            .map(|i| {
                let order = order.clone();
                queue.submit("ordered", move || async move {
                    order.lock().unwrap().push(i);
                })
            })
            .collect();
        for fut in pending.into_iter().rev() {
            fut.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_task_and_frees_slot() {
        let queue = TaskQueue::new(1, Duration::from_secs(1));
        let hung = queue.submit("hung", || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let next = queue.submit("next", || async { "ran" });

        assert_eq!(
            hung.await.unwrap_err(),
            QueueError::Timeout {
                label: "hung".into(),
                secs: 1
            }
        );
        assert_eq!(next.await.unwrap(), "ran");
        assert_eq!(queue.stats().running, 0);
    }

    #[tokio::test]
    async fn panicking_task_reports_and_releases_slot() {
        let queue = TaskQueue::new(1, Duration::from_secs(60));
        let boom = queue.submit("boom", || async {
            panic!("task blew up");
        });
        assert!(matches!(boom.await, Err(QueueError::Panicked { .. })));
        assert_eq!(queue.submit("after", || async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_report_running_and_waiting() {
        let queue = TaskQueue::new(1, Duration::from_secs(60));
        let first = queue.submit("first", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let second = queue.submit("second", || async {});
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            queue.stats(),
            QueueStats {
                limit: 1,
                running: 1,
                waiting: 1
            }
        );
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(queue.stats().waiting, 0);
    }
}
