//! Named, cancellable periodic jobs.
//!
//! Each job runs on its own interval. A run is never interrupted by
//! cancellation and never overlaps with itself; ticks missed while a run is
//! in progress are delayed.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct ScheduledJob {
    period: Duration,
    run: JobFn,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    jobs: BTreeMap<&'static str, ScheduledJob>,
    root: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            root: CancellationToken::new(),
        }
    }

    /// Register a job. Replaces (and cancels) a job of the same name.
    pub fn add<F, Fut>(&mut self, name: &'static str, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let run: JobFn = Arc::new(move || job().boxed());
        let replaced = self.jobs.insert(
            name,
            ScheduledJob {
                period,
                run,
                token: self.root.child_token(),
                handle: None,
            },
        );
        if let Some(old) = replaced {
            old.token.cancel();
        }
    }

    /// Spawn every registered job that is not running yet.
    pub fn start(&mut self) {
        for (name, job) in self.jobs.iter_mut() {
            if job.handle.is_some() || job.token.is_cancelled() {
                continue;
            }
            debug!(job = name, period_secs = job.period.as_secs(), "Starting job");
            job.handle = Some(tokio::spawn(run_periodic(
                *name,
                job.period,
                job.run.clone(),
                job.token.clone(),
            )));
        }
    }

    /// Run one job inline, once. Returns `false` for an unknown name.
    #[cfg(test)]
    pub async fn run_once(&self, name: &str) -> bool {
        let Some(job) = self.jobs.get(name) else {
            return false;
        };
        (job.run)().await;
        true
    }

    /// Stop one job. Returns `false` for an unknown name.
    #[allow(dead_code)]
    pub fn cancel(&mut self, name: &str) -> bool {
        match self.jobs.get(name) {
            Some(job) => {
                job.token.cancel();
                info!(job = name, "Job cancelled");
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_running(&self, name: &str) -> bool {
        self.jobs
            .get(name)
            .map(|job| !job.token.is_cancelled() && job.handle.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.keys().copied().collect()
    }

    /// Cancel every job and wait for in-flight runs to finish.
    pub async fn shutdown(&mut self) {
        self.root.cancel();
        for (name, job) in self.jobs.iter_mut() {
            if let Some(handle) = job.handle.take() {
                let _ = handle.await;
                debug!(job = name, "Job stopped");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_periodic(name: &'static str, period: Duration, run: JobFn, token: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                run().await;
            }
        }
    }
    debug!(job = name, "Job loop exited");
}
