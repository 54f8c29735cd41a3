//! Job Handler Registry
//!
//! A dynamic registry that maps string-based handler names (e.g., "increment")
//! to executable Rust closures. Task payloads stay opaque to the engine; only
//! the registered handler for a task's name ever decodes them. The same
//! registry also services `Init` directives replayed to newly joined workers.

use crate::environment::shared::SharedEnvironment;

use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Execution context handed to every handler invocation.
///
/// Exposes the worker's environment replica and a per-task log buffer whose
/// contents travel back to the submitter inside the `TaskResult`.
pub struct JobContext {
    env: Arc<SharedEnvironment>,
    log: Mutex<String>,
}

impl JobContext {
    pub fn new(env: Arc<SharedEnvironment>) -> Arc<Self> {
        Arc::new(Self {
            env,
            log: Mutex::new(String::new()),
        })
    }

    pub fn env(&self) -> &Arc<SharedEnvironment> {
        &self.env
    }

    /// Appends one line to the captured task log.
    pub fn log(&self, line: impl AsRef<str>) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.push_str(line.as_ref());
        log.push('\n');
    }

    /// Drains the captured log text for the task result.
    pub fn take_log(&self) -> String {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut log)
    }
}

/// Type alias for a thread-safe, asynchronous job handler function.
/// It takes the opaque payload bytes plus the execution context and resolves
/// to the output bytes.
pub type JobHandlerFn = Arc<
    dyn Fn(Vec<u8>, Arc<JobContext>) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>
        + Send
        + Sync,
>;

/// Registry holding the mapping between handler names and their implementation.
pub struct JobHandlerRegistry {
    handlers: DashMap<String, JobHandlerFn>,
}

impl JobHandlerRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
        })
    }

    /// Registers a new handler function under a specific name.
    pub fn register<F, Fut>(&self, handler_name: &str, handler: F)
    where
        F: Fn(Vec<u8>, Arc<JobContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        // Box::pin type-erases the concrete Future so different async fns can
        // live in the same map.
        let handler_fn: JobHandlerFn = Arc::new(move |payload, ctx| {
            Box::pin(handler(payload, ctx)) as Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>
        });

        self.handlers.insert(handler_name.to_string(), handler_fn);

        tracing::info!("Registered job handler: {}", handler_name);
    }

    /// Looks up a handler by name and executes it with the given payload.
    ///
    /// # Returns
    /// * `Ok(bytes)` with the handler's output on success.
    /// * `Err` if the handler failed or no handler exists under that name.
    pub async fn execute(
        &self,
        handler_name: &str,
        payload: Vec<u8>,
        ctx: Arc<JobContext>,
    ) -> Result<Vec<u8>> {
        let handler_fn = self
            .handlers
            .get(handler_name)
            .map(|entry| entry.value().clone());

        match handler_fn {
            Some(handler_fn) => {
                tracing::debug!(
                    "Executing handler '{}' (payload size: {} bytes)",
                    handler_name,
                    payload.len()
                );
                handler_fn(payload, ctx).await
            }
            None => {
                let error = format!("Unknown job handler: {}", handler_name);
                tracing::error!("{}", error);
                Err(anyhow::anyhow!(error))
            }
        }
    }

    /// Checks if a handler is registered.
    pub fn has_handler(&self, handler_name: &str) -> bool {
        self.handlers.contains_key(handler_name)
    }

    /// Returns the total number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for JobHandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}
