//! Remote-Worker Proxy
//!
//! One instance per connected worker, on the coordinator side. The proxy owns
//! that worker's protocol state: the heartbeat timers, the outbound envelope
//! queue with its single-unacknowledged-message window, the set of tasks
//! currently in flight on the worker, and the decaying execution-time average
//! used to rank workers at dispatch.
//!
//! A dedicated reader task decodes inbound frames into a channel; the proxy
//! loop drains it, runs the heartbeat state machine, and flushes outbound
//! envelopes subject to flow control. Once `fail()` is called the proxy is
//! terminal: the coordinator's failure sweep reclaims its in-flight tasks.

use super::coordinator::Coordinator;
use super::summary::WorkerSummary;
use crate::job::types::{Task, TaskId};
use crate::protocol::codec::{read_envelope, write_envelope};
use crate::protocol::types::{Command, Envelope, SeqId};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Heartbeat timings, copied from the coordinator config.
#[derive(Debug, Clone, Copy)]
pub struct ProxyTimings {
    pub ping_frequency: Duration,
    pub ping_timeout: Duration,
    /// Bounded wait of the proxy loop when there is nothing to do.
    pub tick: Duration,
}

/// What the heartbeat state machine wants done this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatAction {
    Wait,
    SendPing,
    Fail,
}

/// Pure decision function of the heartbeat state machine.
///
/// `silence` is how long the worker has been quiet, `since_ping` how long ago
/// we last pinged it. Failure is terminal at twice the connection timeout.
pub(crate) fn heartbeat_action(
    silence: Duration,
    since_ping: Duration,
    ping_frequency: Duration,
    ping_timeout: Duration,
) -> HeartbeatAction {
    if silence >= ping_timeout * 2 {
        HeartbeatAction::Fail
    } else if silence >= ping_frequency && since_ping >= ping_frequency {
        HeartbeatAction::SendPing
    } else {
        HeartbeatAction::Wait
    }
}

struct ProxyState {
    /// Worker's idle slot count; −1 until the first self-report.
    free_slots: i64,
    last_heard: Instant,
    last_ping: Instant,
    /// Outbound envelopes not yet written to the socket.
    pending: VecDeque<Envelope>,
    /// Sequence id of the one envelope awaiting its ack, if any.
    active: Option<SeqId>,
    /// Decaying mean execution time: `avg = (avg + last_ms) / 2`.
    avg_exec_ms: f64,
    dispatched_at: HashMap<TaskId, Instant>,
    in_flight: HashMap<TaskId, Task>,
    accepted: u64,
    completed: u64,
}

/// Coordinator-side representation of one connected worker.
pub struct WorkerProxy {
    pub name: String,
    alive: AtomicBool,
    next_seq: AtomicU64,
    state: Mutex<ProxyState>,
}

impl WorkerProxy {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            name: name.into(),
            alive: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
            state: Mutex::new(ProxyState {
                free_slots: -1,
                last_heard: now,
                last_ping: now,
                pending: VecDeque::new(),
                active: None,
                avg_exec_ms: 0.0,
                dispatched_at: HashMap::new(),
                in_flight: HashMap::new(),
                accepted: 0,
                completed: 0,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Terminal transition; the failure sweep picks the proxy up afterwards.
    pub fn fail(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn assign_seq(&self) -> SeqId {
        SeqId(self.next_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Queues a command for this worker, stamping a sequence id if it
    /// mutates worker state.
    pub fn enqueue(&self, command: Command) {
        let envelope = if command.requires_ack() {
            Envelope::sequenced(self.assign_seq(), command)
        } else {
            Envelope::fire_and_forget(command)
        };
        self.state().pending.push_back(envelope);
    }

    /// Offers a task to this worker.
    ///
    /// Rejects when no free slot is known; otherwise the slot count is
    /// decremented optimistically (before any ack) and a `Work` envelope is
    /// queued. The worker's own reports reconcile the count later.
    pub fn try_execute(&self, task: Task) -> bool {
        let mut state = self.state();
        if state.free_slots <= 0 {
            return false;
        }
        state.free_slots -= 1;
        state.accepted += 1;
        state.dispatched_at.insert(task.id, Instant::now());
        state.in_flight.insert(task.id, task.clone());

        let seq = self.assign_seq();
        state
            .pending
            .push_back(Envelope::sequenced(seq, Command::Work { task }));
        true
    }

    /// Whether nothing is queued or awaiting ack on this connection.
    /// Dispatch only offers tasks to idle channels.
    pub fn channel_idle(&self) -> bool {
        let state = self.state();
        state.active.is_none() && state.pending.is_empty()
    }

    pub fn free_slots(&self) -> i64 {
        self.state().free_slots
    }

    pub fn avg_exec_ms(&self) -> f64 {
        self.state().avg_exec_ms
    }

    pub fn in_flight_len(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Records an inbound message: resets the heartbeat timers and refreshes
    /// the slot count from the worker's piggybacked self-report.
    pub(crate) fn note_heard(&self, free_slots: Option<u32>) {
        let mut state = self.state();
        let now = Instant::now();
        state.last_heard = now;
        state.last_ping = now;
        if let Some(free_slots) = free_slots {
            state.free_slots = free_slots as i64;
        }
    }

    /// Clears the single-in-flight window when the matching ack arrives.
    /// A mismatch is a soft protocol error: logged, connection kept.
    pub(crate) fn handle_ack(&self, seq: Option<SeqId>) {
        let mut state = self.state();
        match (state.active, seq) {
            (Some(active), Some(seq)) if active == seq => {
                state.active = None;
            }
            (_, None) => {
                // Bare ack answering a ping; liveness already noted.
            }
            (active, seq) => {
                tracing::warn!(
                    "Ack mismatch from {}: active {:?}, acknowledged {:?}",
                    self.name,
                    active,
                    seq
                );
            }
        }
    }

    /// Books a returned result: removes the task from the in-flight set,
    /// folds the execution time into the decaying average and frees a slot.
    /// `None` when the task was never in flight here.
    pub(crate) fn note_return(&self, task_id: TaskId) -> Option<Task> {
        let mut state = self.state();
        let task = state.in_flight.remove(&task_id)?;
        if let Some(dispatched) = state.dispatched_at.remove(&task_id) {
            let exec_ms = dispatched.elapsed().as_millis() as f64;
            state.avg_exec_ms = (state.avg_exec_ms + exec_ms) / 2.0;
        }
        state.free_slots += 1;
        state.completed += 1;
        Some(task)
    }

    /// Pulls a task back out of the in-flight set without completing it
    /// (worker rejected the assignment).
    pub(crate) fn remove_in_flight(&self, task_id: TaskId) -> Option<Task> {
        let mut state = self.state();
        state.dispatched_at.remove(&task_id);
        state.in_flight.remove(&task_id)
    }

    /// Empties the in-flight set for resubmission after failure.
    pub(crate) fn drain_in_flight(&self) -> Vec<Task> {
        let mut state = self.state();
        state.dispatched_at.clear();
        state.in_flight.drain().map(|(_, task)| task).collect()
    }

    pub fn summary(&self) -> WorkerSummary {
        let state = self.state();
        WorkerSummary {
            name: self.name.clone(),
            alive: self.is_alive(),
            free_slots: state.free_slots,
            avg_exec_ms: state.avg_exec_ms,
            accepted: state.accepted,
            completed: state.completed,
            in_flight: state.in_flight.len(),
        }
    }

    /// Runs the heartbeat state machine once, recording a sent ping.
    fn heartbeat(&self, timings: &ProxyTimings) -> HeartbeatAction {
        let mut state = self.state();
        let now = Instant::now();
        let action = heartbeat_action(
            now.duration_since(state.last_heard),
            now.duration_since(state.last_ping),
            timings.ping_frequency,
            timings.ping_timeout,
        );
        if action == HeartbeatAction::SendPing {
            state.last_ping = now;
        }
        action
    }

    /// Next envelope allowed out under flow control: nothing while an ack is
    /// outstanding; a seq-bearing envelope occupies the window when sent.
    pub(crate) fn next_outbound(&self) -> Option<Envelope> {
        let mut state = self.state();
        if state.active.is_some() {
            return None;
        }
        let envelope = state.pending.pop_front()?;
        if let Some(seq) = envelope.seq {
            state.active = Some(seq);
        }
        Some(envelope)
    }

    /// The proxy protocol loop. Owns the write half; a spawned reader task
    /// owns the read half and feeds decoded envelopes through a channel so
    /// slow processing never blocks socket reads.
    pub async fn run<S>(
        self: Arc<Self>,
        stream: S,
        coordinator: Arc<Coordinator>,
        timings: ProxyTimings,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);

        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Envelope>(64);
        let reader_proxy = self.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = reader;
            loop {
                match read_envelope(&mut reader).await {
                    Ok(envelope) => {
                        if inbound_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Reader for {} stopped: {}", reader_proxy.name, e);
                        break;
                    }
                }
            }
            // A dead read side means a dead connection.
            reader_proxy.fail();
        });

        let mut tick = tokio::time::interval(timings.tick);

        'protocol: while self.is_alive() {
            tokio::select! {
                inbound = inbound_rx.recv() => match inbound {
                    Some(envelope) => self.handle_inbound(envelope, &coordinator).await,
                    None => {
                        self.fail();
                        break 'protocol;
                    }
                },
                _ = tick.tick() => {}
            }

            // Drain whatever else is already decoded.
            while let Ok(envelope) = inbound_rx.try_recv() {
                self.handle_inbound(envelope, &coordinator).await;
            }

            match self.heartbeat(&timings) {
                HeartbeatAction::Fail => {
                    tracing::warn!("Worker {} unresponsive, declaring failed", self.name);
                    self.fail();
                    break 'protocol;
                }
                HeartbeatAction::SendPing => {
                    tracing::debug!("Pinging {}", self.name);
                    let ping = Envelope::fire_and_forget(Command::Ping);
                    if write_envelope(&mut writer, &ping).await.is_err() {
                        self.fail();
                        break 'protocol;
                    }
                }
                HeartbeatAction::Wait => {}
            }

            while let Some(envelope) = self.next_outbound() {
                if write_envelope(&mut writer, &envelope).await.is_err() {
                    self.fail();
                    break 'protocol;
                }
            }
        }

        self.fail();
        reader_handle.abort();
        tracing::info!("Proxy loop for {} ended", self.name);
    }

    async fn handle_inbound(self: &Arc<Self>, envelope: Envelope, coordinator: &Arc<Coordinator>) {
        self.note_heard(envelope.free_slots);

        match envelope.command {
            Command::Ack { seq } => self.handle_ack(seq),
            Command::Return { result } => {
                coordinator.report_result(self, result).await;
            }
            Command::Error {
                task_id,
                message,
                trace,
            } => {
                tracing::warn!(
                    "Worker {} reported error: {}{}",
                    self.name,
                    message,
                    trace.map(|t| format!("\n{}", t)).unwrap_or_default()
                );
                if let Some(task_id) = task_id {
                    coordinator.reclaim_task(self, task_id).await;
                }
            }
            Command::Summary => {
                tracing::debug!(
                    "Worker {} announced itself with {} free slots",
                    self.name,
                    self.free_slots()
                );
            }
            other => {
                tracing::warn!("Protocol violation from {}: unexpected {:?}", self.name, other);
            }
        }
    }
}
