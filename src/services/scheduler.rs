//! src/services/scheduler.rs
//!
//! Bounded-concurrency job scheduler.
//!
//! Phase one spawns one task per sync job. Each task waits for a semaphore
//! permit before touching the network and publishes a [`JobOutcome`] on a
//! channel. The collector drains exactly one outcome per job; the first
//! failure cancels the jobs still pending, the rest are drained and dropped.
//! Phase two runs the CDN invalidation, only once every sync job succeeded.

use crate::{
    errors::{SyncError, SyncResult},
    models::job::{JobOutcome, Plan},
    services::executor::JobExecutor,
};
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    max_concurrency: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl Scheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Execute `plan`, returning the first job failure.
    ///
    /// `cancel` aborts the whole run; in-flight jobs observe it and report
    /// [`SyncError::Cancelled`], which is surfaced like any other failure.
    pub async fn run<E: JobExecutor>(
        &self,
        plan: Plan,
        executor: Arc<E>,
        cancel: CancellationToken,
    ) -> SyncResult<()> {
        let Plan { jobs, invalidation } = plan;
        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let (tx, mut rx) = mpsc::channel::<JobOutcome>(total.max(1));
        let abort = cancel.child_token();

        debug!(
            "dispatching {} job(s) with concurrency {}",
            total, self.max_concurrency
        );

        for job in jobs {
            let tx = tx.clone();
            let semaphore = semaphore.clone();
            let executor = executor.clone();
            let abort = abort.clone();

            tokio::spawn(async move {
                let work = async {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| SyncError::Cancelled)?;
                    executor.execute(&job).await
                };
                let result = tokio::select! {
                    biased;
                    _ = abort.cancelled() => Err(SyncError::Cancelled),
                    result = AssertUnwindSafe(work).catch_unwind() => {
                        result.unwrap_or_else(|panic| Err(SyncError::Panic(panic_message(panic.as_ref()))))
                    }
                };
                // The collector holds the receiver until every sender is gone.
                let _ = tx.send(JobOutcome { job, result }).await;
            });
        }
        drop(tx);

        let mut received = 0usize;
        let mut first_error = None;
        while let Some(outcome) = rx.recv().await {
            received += 1;
            match outcome.result {
                Ok(()) => {}
                Err(err) if first_error.is_none() => {
                    abort.cancel();
                    first_error = Some(outcome.job.fail(err));
                }
                Err(err) => debug!(
                    "ignoring later failure of {} '{}': {}",
                    outcome.job.action(),
                    outcome.job.remote(),
                    err
                ),
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if received != total {
            return Err(SyncError::Panic(format!(
                "{} of {} job(s) never reported a result",
                total - received,
                total
            )));
        }

        let Some(invalidation) = invalidation else {
            return Ok(());
        };
        if cancel.is_cancelled() {
            warn!("run cancelled before CDN invalidation");
            return Err(invalidation.fail(SyncError::Cancelled));
        }

        info!("invalidating CDN path '{}'", invalidation.path);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = executor.invalidate(&invalidation) => result,
        };
        result.map_err(|err| invalidation.fail(err))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
