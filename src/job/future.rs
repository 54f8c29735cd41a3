//! Client-Side Job Handles
//!
//! A `JobFuture` is handed back by `Coordinator::execute` and resolved exactly
//! once, when the task's result arrives (possibly after resubmissions to other
//! workers). It is a thin wrapper over a oneshot channel, so the timed wait is
//! just a timeout on the receive.

use super::types::{TaskId, TaskResult};

use anyhow::Result;
use std::time::Duration;
use tokio::sync::oneshot;

/// What a resolved job yields to the caller.
#[derive(Debug, Clone)]
pub struct JobOutput {
    /// Handler output bytes.
    pub output: Vec<u8>,
    /// Log text captured on the worker during execution.
    pub log: String,
    /// Name of the worker that produced the result.
    pub worker: String,
}

/// Internal resolution record sent from the coordinator to the future.
#[derive(Debug)]
pub struct JobResolution {
    pub result: TaskResult,
    pub worker: String,
}

/// Single-resolution handle for an executing job.
///
/// Consumed by `wait`/`wait_timeout`; the sending side lives in the
/// coordinator's future table and is removed on resolution, which makes a
/// double resolve structurally impossible.
pub struct JobFuture {
    task_id: TaskId,
    rx: oneshot::Receiver<JobResolution>,
}

impl JobFuture {
    pub fn new(task_id: TaskId) -> (oneshot::Sender<JobResolution>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { task_id, rx })
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Blocks the calling task until the job resolves.
    ///
    /// A handler-side failure surfaces as an `Err` naming the worker; a
    /// dropped coordinator (job permanently abandoned) also surfaces as an
    /// `Err`.
    pub async fn wait(self) -> Result<JobOutput> {
        let task_id = self.task_id;
        let resolution = self
            .rx
            .await
            .map_err(|_| anyhow::anyhow!("task {} abandoned by coordinator", task_id.0))?;
        Self::into_output(task_id, resolution)
    }

    /// Like `wait`, but gives up after `timeout`. `Ok(None)` means the job is
    /// still running; the timeout bounds only this caller's wait, not the
    /// task's execution.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<Option<JobOutput>> {
        let task_id = self.task_id;
        match tokio::time::timeout(timeout, self.rx).await {
            Err(_) => Ok(None),
            Ok(Err(_)) => Err(anyhow::anyhow!(
                "task {} abandoned by coordinator",
                task_id.0
            )),
            Ok(Ok(resolution)) => Self::into_output(task_id, resolution).map(Some),
        }
    }

    fn into_output(task_id: TaskId, resolution: JobResolution) -> Result<JobOutput> {
        let JobResolution { result, worker } = resolution;
        match (result.output, result.error) {
            (Some(output), None) => Ok(JobOutput {
                output,
                log: result.log,
                worker,
            }),
            (_, Some(error)) => Err(anyhow::anyhow!(
                "task {} failed on {}: {}",
                task_id.0,
                worker,
                error
            )),
            (None, None) => Err(anyhow::anyhow!(
                "task {} returned neither output nor error",
                task_id.0
            )),
        }
    }
}
