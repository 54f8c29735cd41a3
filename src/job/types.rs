use serde::{Deserialize, Serialize};

/// Unique identifier for a task.
///
/// Assigned by the coordinator from a monotonic counter. A task keeps its id
/// across resubmissions: when a worker dies mid-flight, the *same* task (same
/// id, same payload) is re-enqueued rather than a fresh copy being minted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// A unit of work shipped to a worker.
///
/// The payload is opaque bytes decoded only by the registered handler; the
/// engine never looks inside. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// The name of the registered handler to invoke (e.g., "increment").
    pub handler: String,
    /// Opaque payload bytes passed to the handler function.
    pub payload: Vec<u8>,
}

/// The completion record of one execution attempt.
///
/// Produced exactly once per attempt that runs to completion on a worker.
/// `output` and `error` are mutually exclusive; a worker that dies mid-task
/// produces neither, which triggers resubmission on the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    /// Handler output bytes, present iff the handler returned `Ok`.
    pub output: Option<Vec<u8>>,
    /// Error text, present iff the handler returned `Err` or panicked.
    pub error: Option<String>,
    /// Log lines the handler appended to its `JobContext` during execution.
    pub log: String,
}

impl TaskResult {
    pub fn success(task_id: TaskId, output: Vec<u8>, log: String) -> Self {
        Self {
            task_id,
            output: Some(output),
            error: None,
            log,
        }
    }

    pub fn failure(task_id: TaskId, error: String, log: String) -> Self {
        Self {
            task_id,
            output: None,
            error: Some(error),
            log,
        }
    }

    pub fn is_success(&self) -> bool {
        self.output.is_some()
    }
}
