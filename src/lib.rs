//! Master/Worker Job Distribution Engine
//!
//! This library crate defines the core modules of a coordinator/worker system
//! that ships serialized units of work to remote machines over long-lived TCP
//! connections. It serves as the foundation for the binary executable
//! (`main.rs`), which can run in either role.
//!
//! ## Architecture Modules
//! The engine is composed of five loosely coupled subsystems:
//!
//! - **`protocol`**: The wire layer. A single tagged `Envelope` type carries
//!   every command; state-mutating commands bear a sequence id and require an
//!   acknowledgment before the next one is sent.
//! - **`environment`**: The replicated shared state every job runs against.
//!   Updates are versioned by a monotonic id and only issued while the whole
//!   cluster is quiescent, so every replica applies them in the same order.
//! - **`job`**: Task payloads, their results, the client-side `JobFuture`
//!   handle, and the registry mapping handler names to executable Rust code.
//! - **`coordinator`**: The master side. Owns the task queue, ranks workers by
//!   a decaying execution-time average, detects failures via heartbeats, and
//!   resubmits work lost to dead connections (at-least-once semantics).
//! - **`worker`**: The remote side. A fixed pool of single-task execution
//!   slots fed by an agent that redials the coordinator forever on drop.

pub mod coordinator;
pub mod environment;
pub mod job;
pub mod protocol;
pub mod worker;
