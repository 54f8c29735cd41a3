//! Worker-Side Agent
//!
//! Owns the socket to the coordinator and the local pool. A dedicated reader
//! task decodes inbound envelopes into a channel; the serve loop selects
//! between that channel and the pool's results channel, so a slow handler
//! never stalls socket reads.
//!
//! On any connection failure the agent waits a fixed backoff and redials,
//! forever. Each reconnect starts a fresh pool, so the coordinator treats the
//! rejoined worker as a brand-new proxy and replays its init directives and
//! the current environment snapshot.

use super::pool::LocalWorkerPool;
use crate::environment::shared::SharedEnvironment;
use crate::environment::types::Environment;
use crate::job::registry::{JobContext, JobHandlerRegistry};
use crate::job::types::{TaskId, TaskResult};
use crate::protocol::codec::{read_envelope, write_envelope};
use crate::protocol::types::{Command, Envelope, SeqId};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Builder-style configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Coordinator address to dial.
    pub coordinator_addr: String,
    /// Number of single-task execution slots.
    pub slots: usize,
    /// Fixed delay between reconnect attempts.
    pub reconnect_backoff: Duration,
    /// Human-readable worker name, used only for logging.
    pub name: String,
}

impl WorkerConfig {
    pub fn new(coordinator_addr: impl Into<String>) -> Self {
        Self {
            coordinator_addr: coordinator_addr.into(),
            slots: 4,
            reconnect_backoff: Duration::from_secs(2),
            name: format!("worker-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Why one connection's serve loop ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ServeExit {
    /// Coordinator sent `Shutdown`; the agent stops for good.
    Shutdown,
    /// The stream died; the agent redials after backoff.
    Disconnected,
}

/// The per-machine agent driving one connection to the coordinator.
pub struct WorkerAgent {
    config: WorkerConfig,
    registry: Arc<JobHandlerRegistry>,
    env: Arc<SharedEnvironment>,
}

impl WorkerAgent {
    pub fn new(
        config: WorkerConfig,
        registry: Arc<JobHandlerRegistry>,
        env: Box<dyn Environment>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            env: SharedEnvironment::new(env),
        })
    }

    pub fn env(&self) -> &Arc<SharedEnvironment> {
        &self.env
    }

    /// Dials the coordinator and serves until told to shut down.
    /// Connection failures are absorbed: wait, redial, repeat.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        loop {
            match TcpStream::connect(&self.config.coordinator_addr).await {
                Ok(stream) => {
                    tracing::info!(
                        "{} connected to coordinator at {}",
                        self.config.name,
                        self.config.coordinator_addr
                    );

                    match self.serve(stream).await {
                        Ok(ServeExit::Shutdown) => {
                            tracing::info!("{} shutting down on coordinator request", self.config.name);
                            return Ok(());
                        }
                        Ok(ServeExit::Disconnected) => {
                            tracing::warn!("{} lost coordinator connection", self.config.name);
                        }
                        Err(e) => {
                            tracing::warn!("{} connection error: {}", self.config.name, e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "{} failed to reach coordinator at {}: {}",
                        self.config.name,
                        self.config.coordinator_addr,
                        e
                    );
                }
            }

            tokio::time::sleep(self.config.reconnect_backoff).await;
        }
    }

    /// Serves one connection until shutdown or stream death.
    pub(crate) async fn serve<S>(&self, stream: S) -> Result<ServeExit>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);

        // Fresh pool per connection: a rejoining worker registers as new.
        let (results_tx, mut results_rx) = mpsc::channel::<TaskResult>(self.config.slots.max(1));
        let pool = LocalWorkerPool::start(
            self.config.slots,
            self.registry.clone(),
            self.env.clone(),
            results_tx,
        );

        // Dedicated reader task decoupling decode from processing.
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Envelope>(64);
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
                        tracing::debug!("Reader stopped: {}", e);
                        break;
                    }
                }
            }
        });

        // Announce ourselves so the coordinator learns our capacity.
        let hello = Envelope::fire_and_forget(Command::Summary).with_free_slots(pool.free_count());
        write_envelope(&mut writer, &hello).await?;

        let exit = loop {
            tokio::select! {
                inbound = inbound_rx.recv() => match inbound {
                    None => break ServeExit::Disconnected,
                    Some(envelope) => {
                        if self.handle_envelope(envelope, &pool, &mut writer).await? == ServeExit::Shutdown {
                            break ServeExit::Shutdown;
                        }
                    }
                },
                result = results_rx.recv() => {
                    if let Some(result) = result {
                        let envelope = Envelope::fire_and_forget(Command::Return { result })
                            .with_free_slots(pool.free_count());
                        write_envelope(&mut writer, &envelope).await?;
                    }
                }
            }
        };

        reader_handle.abort();
        Ok(exit)
    }

    /// Processes one inbound envelope and writes the required replies.
    ///
    /// Seq-bearing envelopes are acked once processed; a processing failure
    /// travels as a separate `Error` envelope so the single-in-flight window
    /// on the coordinator never jams.
    async fn handle_envelope<S>(
        &self,
        envelope: Envelope,
        pool: &LocalWorkerPool,
        writer: &mut WriteHalf<S>,
    ) -> Result<ServeExit>
    where
        S: AsyncWrite,
    {
        let seq = envelope.seq;
        let mut exit = ServeExit::Disconnected;
        let mut shutdown = false;

        match envelope.command {
            Command::Ping => {
                self.send(writer, pool, Envelope::fire_and_forget(Command::Ack { seq: None }))
                    .await?;
                return Ok(exit);
            }
            Command::Environment { snapshot } => {
                if !pool.all_free() {
                    self.send_error(writer, pool, None, "environment replace while slots busy")
                        .await?;
                } else if let Err(e) = self.env.install_snapshot(&snapshot).await {
                    self.send_error(writer, pool, None, &format!("snapshot rejected: {}", e))
                        .await?;
                } else {
                    tracing::info!("Installed environment snapshot ({} bytes)", snapshot.len());
                }
            }
            Command::ModifyEnvironment { updates } => {
                if !pool.all_free() {
                    self.send_error(writer, pool, None, "environment update while slots busy")
                        .await?;
                } else if let Err(e) = self.env.apply(&updates).await {
                    self.send_error(writer, pool, None, &format!("update rejected: {}", e))
                        .await?;
                } else {
                    tracing::info!(
                        "Applied {} environment updates (now at id {})",
                        updates.len(),
                        self.env.update_id().await
                    );
                }
            }
            Command::Work { task } => {
                let task_id = task.id;
                tracing::debug!("Assigned task {} (handler: {})", task_id.0, task.handler);
                if !pool.execute(task) {
                    self.send_error(writer, pool, Some(task_id), "no free slot")
                        .await?;
                }
            }
            Command::Init { directive, payload } => {
                // One-off setup directives run through the normal registry;
                // their output is discarded.
                let registry = self.registry.clone();
                let ctx = JobContext::new(self.env.clone());
                tokio::spawn(async move {
                    if let Err(e) = registry.execute(&directive, payload, ctx).await {
                        tracing::error!("Init directive '{}' failed: {}", directive, e);
                    }
                });
            }
            Command::Shutdown => {
                shutdown = true;
            }
            other => {
                // Soft protocol violation: log and carry on.
                tracing::warn!("Unexpected command from coordinator: {:?}", other);
                return Ok(exit);
            }
        }

        if let Some(seq) = seq {
            self.send_ack(writer, pool, seq).await?;
        } else {
            tracing::warn!("State-mutating command arrived without a sequence id");
        }

        if shutdown {
            exit = ServeExit::Shutdown;
        }
        Ok(exit)
    }

    async fn send<S: AsyncWrite>(
        &self,
        writer: &mut WriteHalf<S>,
        pool: &LocalWorkerPool,
        envelope: Envelope,
    ) -> Result<()> {
        write_envelope(writer, &envelope.with_free_slots(pool.free_count())).await
    }

    async fn send_ack<S: AsyncWrite>(
        &self,
        writer: &mut WriteHalf<S>,
        pool: &LocalWorkerPool,
        seq: SeqId,
    ) -> Result<()> {
        self.send(
            writer,
            pool,
            Envelope::fire_and_forget(Command::Ack { seq: Some(seq) }),
        )
        .await
    }

    async fn send_error<S: AsyncWrite>(
        &self,
        writer: &mut WriteHalf<S>,
        pool: &LocalWorkerPool,
        task_id: Option<TaskId>,
        message: &str,
    ) -> Result<()> {
        tracing::warn!("Reporting error to coordinator: {}", message);
        self.send(
            writer,
            pool,
            Envelope::fire_and_forget(Command::Error {
                task_id,
                message: message.to_string(),
                trace: None,
            }),
        )
        .await
    }
}
