use crate::environment::types::SerializedEnvironmentConfig;
use crate::job::types::{Task, TaskId, TaskResult};

use serde::{Deserialize, Serialize};

/// Sequence number attached to state-mutating envelopes.
///
/// Scoped to one connection; the receiver echoes it back in an `Ack` to
/// confirm delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SeqId(pub u64);

/// Every command the engine speaks, as one exhaustively matched union.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Liveness probe, coordinator → worker. Answered with a bare `Ack`.
    Ping,
    /// Delivery confirmation. `seq` is `Some` when acknowledging a
    /// state-mutating envelope and `None` when answering a `Ping`.
    Ack { seq: Option<SeqId> },
    /// Worker self-report on connect; carries no body of its own (the
    /// free-slot count rides on the envelope like on every worker frame).
    Summary,
    /// Full environment snapshot push, coordinator → worker.
    Environment { snapshot: Vec<u8> },
    /// Incremental environment update batch, applied in order.
    ModifyEnvironment {
        updates: Vec<SerializedEnvironmentConfig>,
    },
    /// Task assignment.
    Work { task: Task },
    /// One-off setup directive replayed to each newly joined worker.
    Init { directive: String, payload: Vec<u8> },
    /// Orderly worker termination.
    Shutdown,
    /// Task completion, worker → coordinator.
    Return { result: TaskResult },
    /// Soft failure report. `task_id` is set when the failure concerns a
    /// specific assignment (e.g., no free slot), letting the coordinator
    /// requeue it immediately.
    Error {
        task_id: Option<TaskId>,
        message: String,
        trace: Option<String>,
    },
}

impl Command {
    /// Whether this command mutates durable worker state and therefore must
    /// carry a sequence id and be acknowledged.
    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            Command::Environment { .. }
                | Command::ModifyEnvironment { .. }
                | Command::Work { .. }
                | Command::Init { .. }
                | Command::Shutdown
        )
    }
}

/// The single wire message type.
///
/// `seq` is present exactly on commands where `requires_ack()` holds; use the
/// constructors to keep that invariant. `free_slots` is the worker's
/// self-reported idle slot count, piggybacked on every worker-originated
/// envelope so the coordinator can continuously resync its view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: Option<SeqId>,
    pub free_slots: Option<u32>,
    pub command: Command,
}

impl Envelope {
    /// A fire-and-forget envelope. Panics in debug builds if the command
    /// actually requires an ack.
    pub fn fire_and_forget(command: Command) -> Self {
        debug_assert!(!command.requires_ack());
        Self {
            seq: None,
            free_slots: None,
            command,
        }
    }

    /// A sequenced envelope for a state-mutating command.
    pub fn sequenced(seq: SeqId, command: Command) -> Self {
        debug_assert!(command.requires_ack());
        Self {
            seq: Some(seq),
            free_slots: None,
            command,
        }
    }

    /// Stamps the worker's current free-slot count onto the envelope.
    pub fn with_free_slots(mut self, free_slots: u32) -> Self {
        self.free_slots = Some(free_slots);
        self
    }
}
