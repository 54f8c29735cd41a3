//! Cluster Summary Snapshot
//!
//! Serializable view of the cluster written periodically by the scheduling
//! loop, for external monitoring. Pure data; the file write lives in the
//! coordinator.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub name: String,
    pub alive: bool,
    /// Worker's self-reported idle slots (−1 = not yet reported).
    pub free_slots: i64,
    /// Decaying mean task execution time in milliseconds.
    pub avg_exec_ms: f64,
    pub accepted: u64,
    pub completed: u64,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    /// Milliseconds since the Unix epoch at snapshot time.
    pub timestamp_ms: u64,
    pub queued: usize,
    pub submitted: u64,
    pub completed: u64,
    /// Tasks re-enqueued because their worker died mid-flight.
    pub redone: u64,
    pub workers: Vec<WorkerSummary>,
    pub dead_workers: usize,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
