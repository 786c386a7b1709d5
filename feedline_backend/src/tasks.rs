//! Bounded runner for post-commit work.

use crate::config::TaskConfig;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Runs named jobs off the request path. Failures are logged and dropped;
/// nothing is retried.
#[derive(Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl BackgroundTasks {
    pub fn new(config: TaskConfig) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
        }
    }

    /// Queues `work` as the job named `job`. Outside a tokio runtime the job
    /// runs inline on the caller.
    pub fn spawn<F>(&self, job: &'static str, work: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        if tokio::runtime::Handle::try_current().is_err() {
            report(job, work());
            return;
        }
        let permits = Arc::clone(&self.permits);
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::warn!(job, "task runner closed, dropping job");
                return;
            };
            tracing::debug!(job, "background job started");
            match tokio::task::spawn_blocking(work).await {
                Ok(outcome) => report(job, outcome),
                Err(err) => tracing::error!(job, error = %err, "background job panicked"),
            }
        });
    }

    /// Waits for every job queued so far, then accepts new jobs again.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.permits.close();
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

fn report(job: &'static str, outcome: Result<()>) {
    match outcome {
        Ok(()) => tracing::debug!(job, "background job finished"),
        Err(err) => tracing::error!(job, error = %format!("{err:#}"), "background job failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn drain_waits_for_queued_jobs() {
        let tasks = BackgroundTasks::new(TaskConfig {
            max_concurrent_jobs: 2,
        });
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let done = Arc::clone(&done);
            tasks.spawn("count", move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(tasks.in_flight(), 0);
    }

    #[tokio::test]
    async fn failing_job_does_not_stop_the_runner() {
        let tasks = BackgroundTasks::new(TaskConfig::default());
        let done = Arc::new(AtomicUsize::new(0));
        tasks.spawn("fails", || Err(anyhow::anyhow!("boom")));
        let counter = Arc::clone(&done);
        tasks.spawn("succeeds", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&done);
        tasks.spawn("after drain", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn runs_inline_without_a_runtime() {
        let tasks = BackgroundTasks::new(TaskConfig::default());
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        tasks.spawn("inline", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
