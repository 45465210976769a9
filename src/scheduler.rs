//! One-shot delayed tasks with fire-time preconditions
//!
//! A scheduled task sleeps for its delay, then (for guarded tasks) evaluates its
//! guard and runs its action only if the guard still holds. Conditions are read
//! when the task fires, never when it is scheduled.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawns delayed one-shot tasks on the tokio runtime
#[derive(Debug, Clone)]
pub struct Scheduler {
    /// Label used in log lines, usually the device address
    label: String,
}

impl Scheduler {
    /// Create a scheduler whose log lines carry `label`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    /// Run `task` once after `delay`
    pub fn schedule<F>(&self, delay: Duration, task: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        ScheduledTask { handle }
    }

    /// Run `action` once after `delay`, but only if `guard` returns true at that moment
    pub fn schedule_guarded<G, A, Fut>(&self, delay: Duration, guard: G, action: A) -> ScheduledTask
    where
        G: FnOnce() -> bool + Send + 'static,
        A: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let label = self.label.clone();
        self.schedule(delay, async move {
            if guard() {
                debug!("[SCHED] {}: guard passed after {:?}", label, delay);
                action().await;
            } else {
                debug!("[SCHED] {}: guard rejected after {:?}, dropping task", label, delay);
            }
        })
    }
}

/// Handle to a scheduled task. Dropping it cancels the task.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Cancel the task if it has not fired yet
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the task has fired (or been cancelled)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
