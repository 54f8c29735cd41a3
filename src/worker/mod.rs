//! Worker-Side Agent and Execution Pool
//!
//! Runs on each remote machine. The agent owns one socket to the coordinator
//! and a fixed-size pool of single-task execution slots; it pumps incoming
//! assignments into free slots and ships results back, and it redials the
//! coordinator forever when the connection drops. On every reconnect the pool
//! re-registers as fresh, so the coordinator sees a rejoined worker as a
//! brand-new proxy.
//!
//! ## Submodules
//! - **`pool`**: `LocalWorkerPool`, N independent slots each running on its
//!   own task and blocking until handed work.
//! - **`agent`**: `WorkerAgent`, the connection/dispatch loop and its
//!   builder-style `WorkerConfig`.

pub mod agent;
pub mod pool;

#[cfg(test)]
mod tests;
