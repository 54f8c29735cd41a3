//! Local Worker Pool
//!
//! A fixed set of single-task execution slots. Each slot runs on its own
//! spawned task and blocks on a capacity-1 channel until handed work, so
//! there is no polling. A slot runs its task against the agent's current
//! environment replica, pushes the `TaskResult` into the shared results
//! channel, and returns to idle.

use crate::environment::shared::SharedEnvironment;
use crate::job::registry::{JobContext, JobHandlerRegistry};
use crate::job::types::{Task, TaskResult};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;

/// One execution slot: a flag plus the channel feeding its task loop.
struct PoolSlot {
    busy: Arc<AtomicBool>,
    tx: mpsc::Sender<Task>,
}

/// Fixed-size pool of execution slots on one worker machine.
pub struct LocalWorkerPool {
    slots: Vec<PoolSlot>,
}

impl LocalWorkerPool {
    /// Spawns `slot_count` slot loops. Results of every slot flow into
    /// `results_tx`, from where the agent forwards them to the coordinator.
    pub fn start(
        slot_count: usize,
        registry: Arc<JobHandlerRegistry>,
        env: Arc<SharedEnvironment>,
        results_tx: mpsc::Sender<TaskResult>,
    ) -> Self {
        let mut slots = Vec::with_capacity(slot_count);

        for slot_id in 0..slot_count {
            let busy = Arc::new(AtomicBool::new(false));
            let (tx, rx) = mpsc::channel::<Task>(1);

            let loop_busy = busy.clone();
            let loop_registry = registry.clone();
            let loop_env = env.clone();
            let loop_results = results_tx.clone();
            tokio::spawn(async move {
                slot_loop(slot_id, rx, loop_busy, loop_registry, loop_env, loop_results).await;
            });

            slots.push(PoolSlot { busy, tx });
        }

        tracing::info!("Started local worker pool with {} slots", slot_count);

        Self { slots }
    }

    /// Hands the task to the first free slot.
    ///
    /// Returns `false` when every slot is occupied; the caller reports the
    /// rejection back to the coordinator, which requeues the task.
    pub fn execute(&self, task: Task) -> bool {
        for slot in &self.slots {
            if slot
                .busy
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if slot.tx.try_send(task).is_err() {
                    // Slot loop is gone; mark it occupied for good.
                    tracing::error!("Pool slot channel closed, slot permanently lost");
                    return false;
                }
                return true;
            }
        }
        false
    }

    /// Number of currently idle slots (reported on every outbound envelope).
    pub fn free_count(&self) -> u32 {
        self.slots
            .iter()
            .filter(|slot| !slot.busy.load(Ordering::SeqCst))
            .count() as u32
    }

    /// Whether every slot is idle. Precondition for environment changes.
    pub fn all_free(&self) -> bool {
        self.free_count() as usize == self.slots.len()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// The main loop for a single slot.
///
/// The handler runs in its own spawned task so that a panic inside it is
/// captured as a failed `TaskResult` instead of killing the slot.
async fn slot_loop(
    slot_id: usize,
    mut rx: mpsc::Receiver<Task>,
    busy: Arc<AtomicBool>,
    registry: Arc<JobHandlerRegistry>,
    env: Arc<SharedEnvironment>,
    results_tx: mpsc::Sender<TaskResult>,
) {
    tracing::debug!("Pool slot {} started", slot_id);

    while let Some(task) = rx.recv().await {
        let started = Instant::now();
        let ctx = JobContext::new(env.clone());

        let handle = {
            let registry = registry.clone();
            let ctx = ctx.clone();
            let handler = task.handler.clone();
            let payload = task.payload.clone();
            tokio::spawn(async move { registry.execute(&handler, payload, ctx).await })
        };

        let result = match handle.await {
            Ok(Ok(output)) => TaskResult::success(task.id, output, ctx.take_log()),
            Ok(Err(e)) => TaskResult::failure(task.id, e.to_string(), ctx.take_log()),
            Err(join_err) => TaskResult::failure(
                task.id,
                format!("handler panicked: {}", join_err),
                ctx.take_log(),
            ),
        };

        tracing::debug!(
            "Slot {} finished task {} in {}ms (ok={})",
            slot_id,
            task.id.0,
            started.elapsed().as_millis(),
            result.is_success()
        );

        // Free the slot before reporting, so the result envelope already
        // carries the refreshed free-slot count.
        busy.store(false, Ordering::SeqCst);

        if results_tx.send(result).await.is_err() {
            // Agent dropped the connection; the coordinator will resubmit.
            break;
        }
    }

    tracing::debug!("Pool slot {} stopped", slot_id);
}
