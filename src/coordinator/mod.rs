//! Coordinator Side of the Engine
//!
//! The coordinator accepts TCP connections from workers, owns the task queue,
//! and keeps the cluster consistent. One `WorkerProxy` per connection runs the
//! heartbeat/ack/flow-control protocol; the scheduling loop sweeps failed
//! proxies (resubmitting their in-flight tasks), dispatches queued work in
//! performance order, and periodically snapshots a cluster summary to disk.
//!
//! ## Submodules
//! - **`config`**: Builder-style `CoordinatorConfig`.
//! - **`coordinator`**: The `Coordinator` itself: submission, environment
//!   mutation at the quiescence boundary, scheduling, result resolution.
//! - **`proxy`**: Per-worker connection state machine.
//! - **`summary`**: Serializable cluster summary written by the scheduler.

pub mod config;
pub mod coordinator;
pub mod proxy;
pub mod summary;
