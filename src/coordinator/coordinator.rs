//! The Coordinator
//!
//! Owns the task queue, the proxy roster and the reference environment.
//! Client code submits jobs through `execute` and awaits the returned
//! `JobFuture`; the scheduling loop assigns queued tasks to the
//! fastest-responding free workers, one per worker per round, and resubmits
//! anything lost to a failed connection (at-least-once semantics — callers
//! must not submit non-idempotent jobs).
//!
//! Environment changes only happen at the "boundary": the system-wide
//! quiescent point with no task queued or in flight anywhere. That keeps
//! every replica applying the same updates in the same order.

use super::config::CoordinatorConfig;
use super::proxy::{ProxyTimings, WorkerProxy};
use super::summary::{ClusterSummary, now_ms};
use crate::environment::shared::SharedEnvironment;
use crate::environment::types::{Environment, EnvironmentConfig, SerializedEnvironmentConfig};
use crate::job::future::{JobFuture, JobResolution};
use crate::job::types::{Task, TaskId, TaskResult};
use crate::protocol::types::Command;

use anyhow::{Context, Result};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::sync::oneshot;

/// Queue, roster and dead list, guarded by one coarse lock held briefly per
/// mutation. Per-proxy protocol state lives inside each proxy.
struct CoordState {
    queue: VecDeque<Task>,
    proxies: Vec<Arc<WorkerProxy>>,
    dead: Vec<Arc<WorkerProxy>>,
}

/// The master side of the engine.
pub struct Coordinator {
    config: CoordinatorConfig,
    env: Arc<SharedEnvironment>,
    state: Mutex<CoordState>,
    /// Pending futures by task id; a resolved task's sender is removed, so
    /// each future resolves at most once.
    futures: DashMap<TaskId, oneshot::Sender<JobResolution>>,
    next_task_id: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
    /// Tasks re-enqueued after their worker was declared failed.
    redone: AtomicU64,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, env: Box<dyn Environment>) -> Arc<Self> {
        Arc::new(Self {
            config,
            env: SharedEnvironment::new(env),
            state: Mutex::new(CoordState {
                queue: VecDeque::new(),
                proxies: Vec::new(),
                dead: Vec::new(),
            }),
            futures: DashMap::new(),
            next_task_id: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            redone: AtomicU64::new(0),
        })
    }

    pub fn env(&self) -> &Arc<SharedEnvironment> {
        &self.env
    }

    /// Binds the listener and spawns the accept and scheduling loops.
    /// Returns the actual bound address (useful with port 0).
    ///
    /// A bind failure is the one unrecoverable startup condition and is
    /// propagated to the caller.
    pub async fn start(self: &Arc<Self>) -> Result<std::net::SocketAddr> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind listener on {}", self.config.listen_addr))?;
        let addr = listener.local_addr()?;

        let accept_self = self.clone();
        tokio::spawn(async move {
            accept_self.accept_loop(listener).await;
        });

        let scheduler_self = self.clone();
        tokio::spawn(async move {
            scheduler_self.scheduling_loop().await;
        });

        tracing::info!("Coordinator listening on {}", addr);
        Ok(addr)
    }

    /// Wraps a job into a task with a fresh id, registers its future and
    /// enqueues it. Never blocks on workers.
    pub async fn execute(&self, handler: impl Into<String>, payload: Vec<u8>) -> JobFuture {
        let id = TaskId(self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1);
        let task = Task {
            id,
            handler: handler.into(),
            payload,
        };

        let (tx, future) = JobFuture::new(id);
        self.futures.insert(id, tx);
        self.submitted.fetch_add(1, Ordering::SeqCst);

        self.state.lock().await.queue.push_back(task);
        tracing::debug!("Enqueued task {}", id.0);

        future
    }

    /// Replaces the reference environment and pushes the snapshot to every
    /// live worker. Succeeds only at the boundary (no task queued or in
    /// flight anywhere); otherwise returns `Ok(false)` with no side effects.
    ///
    /// Serialization happens before anything is mutated or sent, so a failing
    /// snapshot leaves the old environment in place everywhere.
    pub async fn setup_environment(&self, new_env: Box<dyn Environment>) -> Result<bool> {
        let state = self.state.lock().await;
        if !Self::quiescent(&state) {
            tracing::warn!("Environment setup rejected: tasks outstanding");
            return Ok(false);
        }

        let snapshot = new_env
            .serialize()
            .context("failed to serialize new environment")?;
        self.env.install(new_env).await;

        for proxy in &state.proxies {
            proxy.enqueue(Command::Environment {
                snapshot: snapshot.clone(),
            });
        }

        tracing::info!(
            "Installed new environment ({} bytes), pushed to {} workers",
            snapshot.len(),
            state.proxies.len()
        );
        Ok(true)
    }

    /// Applies an update batch locally and broadcasts the identical
    /// serialized directives to every live worker. Boundary-gated like
    /// `setup_environment`.
    ///
    /// Each directive was serialized exactly once, at construction; this
    /// method only stamps the next positions in the update total order.
    pub async fn update_environment(&self, configs: Vec<EnvironmentConfig>) -> Result<bool> {
        let state = self.state.lock().await;
        if !Self::quiescent(&state) {
            tracing::warn!("Environment update rejected: tasks outstanding");
            return Ok(false);
        }

        let base = self.env.update_id().await;
        let updates: Vec<SerializedEnvironmentConfig> = configs
            .into_iter()
            .enumerate()
            .map(|(i, config)| SerializedEnvironmentConfig {
                id: base + 1 + i as u64,
                key: config.key,
                value: config.value,
            })
            .collect();

        self.env
            .apply(&updates)
            .await
            .context("failed to apply environment update locally")?;

        for proxy in &state.proxies {
            proxy.enqueue(Command::ModifyEnvironment {
                updates: updates.clone(),
            });
        }

        tracing::info!(
            "Broadcast {} environment updates (through id {})",
            updates.len(),
            base + updates.len() as u64
        );
        Ok(true)
    }

    fn quiescent(state: &CoordState) -> bool {
        state.queue.is_empty() && state.proxies.iter().all(|p| p.in_flight_len() == 0)
    }

    /// Queued plus in-flight tasks across every proxy.
    pub async fn remaining_outstanding_tasks(&self) -> usize {
        let state = self.state.lock().await;
        state.queue.len()
            + state
                .proxies
                .iter()
                .map(|p| p.in_flight_len())
                .sum::<usize>()
    }

    /// Books a task result arriving through `proxy` and resolves the
    /// originating future. `false` when the proxy never had that task in
    /// flight (unknown pair: a no-op).
    pub async fn report_result(&self, proxy: &Arc<WorkerProxy>, result: TaskResult) -> bool {
        let task_id = result.task_id;

        if proxy.note_return(task_id).is_none() {
            tracing::warn!(
                "Result for unknown task {} from {}, ignoring",
                task_id.0,
                proxy.name
            );
            return false;
        }

        self.completed.fetch_add(1, Ordering::SeqCst);

        match self.futures.remove(&task_id) {
            Some((_, tx)) => {
                let _ = tx.send(JobResolution {
                    result,
                    worker: proxy.name.clone(),
                });
            }
            None => {
                // A resubmitted task can complete on two workers; the first
                // result won.
                tracing::debug!("Duplicate result for task {}, already resolved", task_id.0);
            }
        }
        true
    }

    /// Requeues a task the worker rejected (e.g., no free slot after an
    /// optimistic dispatch).
    pub async fn reclaim_task(&self, proxy: &Arc<WorkerProxy>, task_id: TaskId) {
        let mut state = self.state.lock().await;
        if let Some(task) = proxy.remove_in_flight(task_id) {
            tracing::warn!("Requeueing task {} rejected by {}", task_id.0, proxy.name);
            self.redone.fetch_add(1, Ordering::SeqCst);
            state.queue.push_back(task);
        }
    }

    /// Wires a fresh connection into the roster: creates the proxy, replays
    /// the configured init directives, pushes the current environment
    /// snapshot and spawns the protocol loop.
    pub async fn register_worker<S>(self: &Arc<Self>, stream: S, name: String) -> Arc<WorkerProxy>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let proxy = WorkerProxy::new(name);

        for init in &self.config.init_directives {
            proxy.enqueue(Command::Init {
                directive: init.directive.clone(),
                payload: init.payload.clone(),
            });
        }

        match self.env.snapshot().await {
            Ok(snapshot) => proxy.enqueue(Command::Environment { snapshot }),
            Err(e) => tracing::error!(
                "Could not snapshot environment for {}: {}",
                proxy.name,
                e
            ),
        }

        self.state.lock().await.proxies.push(proxy.clone());

        let timings = ProxyTimings {
            ping_frequency: self.config.ping_frequency,
            ping_timeout: self.config.ping_timeout,
            tick: self.config.proxy_tick,
        };
        tokio::spawn(proxy.clone().run(stream, self.clone(), timings));

        tracing::info!("Registered worker {}", proxy.name);
        proxy
    }

    /// Asks every live worker to terminate.
    pub async fn shutdown_workers(&self) {
        let state = self.state.lock().await;
        for proxy in &state.proxies {
            proxy.enqueue(Command::Shutdown);
        }
        tracing::info!("Shutdown sent to {} workers", state.proxies.len());
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn redone_count(&self) -> u64 {
        self.redone.load(Ordering::SeqCst)
    }

    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    pub async fn queued_count(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn worker_count(&self) -> usize {
        self.state.lock().await.proxies.len()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::info!("Worker connected from {}", addr);
                    self.register_worker(stream, format!("worker-{}", addr)).await;
                }
                Err(e) => {
                    tracing::error!("Failed to accept worker connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Failure sweep, then performance-ordered dispatch, then the periodic
    /// summary snapshot.
    async fn scheduling_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.config.scheduler_tick);
        let mut last_summary = Instant::now();

        loop {
            tick.tick().await;

            self.sweep_failed().await;
            self.dispatch_round().await;

            if let Some(summary) = &self.config.summary
                && last_summary.elapsed() >= summary.frequency
            {
                last_summary = Instant::now();
                self.write_summary(&summary.path).await;
            }
        }
    }

    /// Moves dead proxies off the roster and resubmits their in-flight
    /// tasks. The "redone" counter grows by exactly the number reclaimed.
    async fn sweep_failed(&self) {
        let mut state = self.state.lock().await;

        let proxies = std::mem::take(&mut state.proxies);
        let (live, newly_dead): (Vec<_>, Vec<_>) =
            proxies.into_iter().partition(|p| p.is_alive());
        state.proxies = live;

        for proxy in newly_dead {
            let tasks = proxy.drain_in_flight();
            if tasks.is_empty() {
                tracing::info!("Worker {} failed with nothing in flight", proxy.name);
            } else {
                tracing::warn!(
                    "Worker {} failed with {} in-flight tasks, resubmitting",
                    proxy.name,
                    tasks.len()
                );
                self.redone.fetch_add(tasks.len() as u64, Ordering::SeqCst);
                state.queue.extend(tasks);
            }
            state.dead.push(proxy);
        }
    }

    /// Offers at most one task per proxy per round, fastest proxies first,
    /// so a single fast worker cannot starve the rest when the queue briefly
    /// exceeds total capacity.
    async fn dispatch_round(&self) {
        let mut state = self.state.lock().await;
        if state.queue.is_empty() {
            return;
        }

        let mut order = state.proxies.clone();
        order.sort_by(|a, b| a.avg_exec_ms().total_cmp(&b.avg_exec_ms()));

        for proxy in order {
            if state.queue.is_empty() {
                break;
            }
            // Skip proxies with an unconfirmed envelope or no known free slot.
            if !proxy.channel_idle() || proxy.free_slots() <= 0 {
                continue;
            }

            let Some(task) = state.queue.pop_front() else {
                break;
            };
            let task_id = task.id;

            if proxy.try_execute(task.clone()) {
                tracing::debug!("Dispatched task {} to {}", task_id.0, proxy.name);
            } else {
                state.queue.push_front(task);
            }
        }
    }

    /// Snapshot of counters and per-worker stats for external monitoring.
    pub async fn cluster_summary(&self) -> ClusterSummary {
        let state = self.state.lock().await;
        let workers = state
            .proxies
            .iter()
            .chain(state.dead.iter())
            .map(|p| p.summary())
            .collect();

        ClusterSummary {
            timestamp_ms: now_ms(),
            queued: state.queue.len(),
            submitted: self.submitted_count(),
            completed: self.completed_count(),
            redone: self.redone_count(),
            workers,
            dead_workers: state.dead.len(),
        }
    }

    async fn write_summary(&self, path: &Path) {
        let summary = self.cluster_summary().await;
        match serde_json::to_vec_pretty(&summary) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(path, bytes).await {
                    tracing::error!("Failed to write summary to {}: {}", path.display(), e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize summary: {}", e),
        }
    }
}
