//! Task queue polling loop.
//!
//! Each poll claims pending tasks one at a time, runs them through the
//! [`TaskHandler`] and writes the outcome back with a single conditional
//! statement per transition.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::common::error::StoreResult;
use crate::common::unix_timestamp;
use crate::session::SessionContext;
use crate::store::{BridgeStore, TaskStatus};
use crate::tasks::handlers::{TaskHandler, TaskOutcome};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub batch_size: i64,
    pub max_attempts: i64,
    pub gc_timeout: Duration,
    pub not_ready_alert_after: Duration,
}

/// Counters for one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub done: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Claims lost to another execution.
    pub lost: usize,
    /// Tasks whose outcome could not be written; they stay `processing`.
    pub unrecorded: usize,
}

/// Tracks how long tasks have been skipped for lack of a ready session and
/// decides when to raise an alert.
#[derive(Debug)]
pub struct NotReadyMonitor {
    alert_after: Duration,
    skips: u64,
    first_skip: Option<Instant>,
    last_alert: Option<Instant>,
}

impl NotReadyMonitor {
    pub fn new(alert_after: Duration) -> Self {
        Self {
            alert_after,
            skips: 0,
            first_skip: None,
            last_alert: None,
        }
    }

    /// Record `count` skips at `now`. Returns `true` when an alert is due.
    pub fn record_skips(&mut self, count: u64, now: Instant) -> bool {
        self.skips += count;
        let first = *self.first_skip.get_or_insert(now);

        if now.duration_since(first) < self.alert_after {
            return false;
        }
        match self.last_alert {
            Some(last) if now.duration_since(last) < self.alert_after => false,
            _ => {
                self.last_alert = Some(now);
                true
            }
        }
    }

    /// The session is usable again.
    pub fn reset(&mut self) {
        self.skips = 0;
        self.first_skip = None;
        self.last_alert = None;
    }

    pub fn skips(&self) -> u64 {
        self.skips
    }

    fn skipping_for(&self, now: Instant) -> Duration {
        self.first_skip.map(|first| now.duration_since(first)).unwrap_or_default()
    }
}

pub struct TaskProcessor {
    store: BridgeStore,
    ctx: Arc<SessionContext>,
    handler: TaskHandler,
    settings: ProcessorSettings,
    not_ready: Mutex<NotReadyMonitor>,
}

impl TaskProcessor {
    pub fn new(store: BridgeStore, ctx: Arc<SessionContext>, settings: ProcessorSettings) -> Self {
        let handler = TaskHandler::new(ctx.clone(), settings.gc_timeout);
        let not_ready = Mutex::new(NotReadyMonitor::new(settings.not_ready_alert_after));
        Self {
            store,
            ctx,
            handler,
            settings,
            not_ready,
        }
    }

    /// Log tasks left in `processing` by a previous crash. They are not
    /// re-claimed.
    pub async fn report_stuck_tasks(&self) -> StoreResult<i64> {
        let stuck = self.store.count_tasks_with_status(TaskStatus::Processing).await?;
        if stuck > 0 {
            warn!(count = stuck, "Tasks left in processing by a previous run");
        }
        Ok(stuck)
    }

    /// Claim and run one batch of pending tasks.
    pub async fn poll_once(&self) -> StoreResult<PollSummary> {
        let mut summary = PollSummary::default();
        let tasks = self.store.pending_tasks(self.settings.batch_size).await?;

        for task in tasks {
            if !self.store.claim_task(task.id, unix_timestamp()).await? {
                debug!(task_id = task.id, "Task claimed elsewhere");
                summary.lost += 1;
                continue;
            }

            debug!(task_id = task.id, task_type = %task.task_type, attempt = task.attempts + 1, "Running task");
            let outcome = self.handler.handle(&task.task_type, task.payload.as_deref()).await;
            let now = unix_timestamp();

            match outcome {
                Ok(TaskOutcome::Done(result)) => {
                    let result = result.to_string();
                    if record(task.id, || self.store.complete_task(task.id, &result, now)).await.is_none() {
                        summary.unrecorded += 1;
                        continue;
                    }
                    info!(task_id = task.id, task_type = %task.task_type, "Task done");
                    summary.done += 1;
                }
                Ok(TaskOutcome::Skip) => {
                    if record(task.id, || self.store.release_task(task.id, now)).await.is_none() {
                        summary.unrecorded += 1;
                        continue;
                    }
                    debug!(task_id = task.id, task_type = %task.task_type, "Session not ready, task released");
                    summary.skipped += 1;
                }
                Err(e) if e.is_permanent() => {
                    let error = e.to_string();
                    if record(task.id, || self.store.fail_task_permanently(task.id, &error, now))
                        .await
                        .is_none()
                    {
                        summary.unrecorded += 1;
                        continue;
                    }
                    warn!(task_id = task.id, task_type = %task.task_type, error = %e, "Task failed permanently");
                    summary.failed += 1;
                }
                Err(e) => {
                    let error = e.to_string();
                    let max_attempts = self.settings.max_attempts;
                    let Some(outcome) =
                        record(task.id, || self.store.fail_task_attempt(task.id, &error, max_attempts, now)).await
                    else {
                        summary.unrecorded += 1;
                        continue;
                    };
                    match outcome.map(|o| (o.status, o.attempts)) {
                        Some((TaskStatus::Failed, attempts)) => {
                            warn!(task_id = task.id, task_type = %task.task_type, attempts, error = %e, "Task failed");
                            summary.failed += 1;
                        }
                        Some((_, attempts)) => {
                            info!(task_id = task.id, task_type = %task.task_type, attempts, error = %e, "Task attempt failed, will retry");
                            summary.retried += 1;
                        }
                        None => warn!(task_id = task.id, "Task left processing before its failure was recorded"),
                    }
                }
            }
        }

        self.track_not_ready(&summary);
        Ok(summary)
    }

    fn track_not_ready(&self, summary: &PollSummary) {
        let mut monitor = self.not_ready.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if summary.skipped > 0 {
            let now = Instant::now();
            if monitor.record_skips(summary.skipped as u64, now) {
                error!(
                    skips = monitor.skips(),
                    not_ready_secs = monitor.skipping_for(now).as_secs(),
                    state = %self.ctx.state(),
                    "Tasks keep waiting for a ready Steam session"
                );
            }
        } else if self.ctx.is_ready() {
            monitor.reset();
        }
    }

    #[cfg(test)]
    pub fn not_ready_skips(&self) -> u64 {
        self.not_ready.lock().map(|m| m.skips()).unwrap_or(0)
    }
}

/// Write a task outcome, retrying once. A second failure is logged and the
/// batch moves on.
async fn record<T, F, Fut>(task_id: i64, mut write: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    match write().await {
        Ok(value) => return Some(value),
        Err(e) => warn!(task_id, error = %e, "Failed to record task outcome, retrying"),
    }
    match write().await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(task_id, error = %e, "Task outcome lost, task left in processing");
            None
        }
    }
}
