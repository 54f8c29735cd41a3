//! Job Payloads, Results and Futures
//!
//! Everything the engine knows about a unit of work lives here. A `Task` is an
//! opaque payload plus the name of a registered handler; the engine itself
//! never inspects job semantics.
//!
//! ## Submodules
//! - **`types`**: `Task`, `TaskId`, `TaskResult` wire-level data types.
//! - **`future`**: `JobFuture`, the client-side single-resolution handle used
//!   to await a submitted job.
//! - **`registry`**: Maps handler names (e.g., "increment") to executable
//!   async Rust closures, and the `JobContext` they run against.

pub mod future;
pub mod registry;
pub mod types;

#[cfg(test)]
mod tests;
