//! Replicated Shared Environment
//!
//! Every job on a worker runs against one process-wide mutable environment.
//! The coordinator holds the reference copy; each worker holds a replica.
//! Replicas converge because mutations are only issued while the cluster is
//! quiescent and are applied everywhere in the single total order assigned by
//! the coordinator's update-id counter.
//!
//! ## Submodules
//! - **`types`**: The `Environment` trait applications implement, plus the
//!   update-directive types (`EnvironmentConfig`, `SerializedEnvironmentConfig`).
//! - **`shared`**: `SharedEnvironment`, the versioning wrapper that owns the
//!   update id, the lazily cached snapshot bytes, and the mutation lock.

pub mod shared;
pub mod types;

#[cfg(test)]
mod tests;
