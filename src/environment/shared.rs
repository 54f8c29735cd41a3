//! Versioned Environment Wrapper
//!
//! `SharedEnvironment` owns one `Environment` implementation behind its own
//! lock, separate from the coordinator's task-bookkeeping lock, so reads
//! during snapshot serialization never block dispatch bookkeeping.
//!
//! It tracks the update id that totally orders mutations and keeps a lazily
//! computed cache of the serialized snapshot, invalidated on every write.
//! The same wrapper is used on both sides: the coordinator mutates its
//! reference copy through it, and each worker applies received snapshots and
//! update batches through it.

use super::types::{Environment, SerializedEnvironmentConfig};

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;

struct EnvState {
    env: Box<dyn Environment>,
    update_id: u64,
    /// Cached full-snapshot bytes; `None` after any mutation.
    snapshot_cache: Option<Vec<u8>>,
}

/// Thread-safe, versioned holder of the process-wide environment replica.
pub struct SharedEnvironment {
    state: RwLock<EnvState>,
}

impl SharedEnvironment {
    pub fn new(env: Box<dyn Environment>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(EnvState {
                env,
                update_id: 0,
                snapshot_cache: None,
            }),
        })
    }

    /// The id of the last applied update (0 right after a full install).
    pub async fn update_id(&self) -> u64 {
        self.state.read().await.update_id
    }

    /// Serialized form of the current state, computed at most once per
    /// mutation epoch.
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        {
            let state = self.state.read().await;
            if let Some(cached) = &state.snapshot_cache {
                return Ok(cached.clone());
            }
        }

        let mut state = self.state.write().await;
        // Another writer may have filled the cache while we upgraded.
        if state.snapshot_cache.is_none() {
            let bytes = state.env.serialize()?;
            state.snapshot_cache = Some(bytes);
        }
        Ok(state.snapshot_cache.clone().unwrap_or_default())
    }

    /// Replaces the environment wholesale and resets the update order.
    pub async fn install(&self, env: Box<dyn Environment>) {
        let mut state = self.state.write().await;
        state.env = env;
        state.update_id = 0;
        state.snapshot_cache = None;
    }

    /// Replaces the state from received snapshot bytes (worker side).
    pub async fn install_snapshot(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.write().await;
        state.env.deserialize(bytes)?;
        state.update_id = 0;
        state.snapshot_cache = None;
        Ok(())
    }

    /// Applies an update batch in order, advancing the update id.
    ///
    /// Fails on the first directive the environment rejects; directives
    /// before the failure stay applied (the coordinator only broadcasts
    /// batches it already applied successfully, so a failure here means the
    /// replica diverged and the connection should be torn down).
    pub async fn apply(&self, updates: &[SerializedEnvironmentConfig]) -> Result<()> {
        let mut state = self.state.write().await;
        for update in updates {
            state.env.apply_update(&update.key, &update.value)?;
            state.update_id = update.id;
            state.snapshot_cache = None;
        }
        Ok(())
    }

    /// Runs a closure against the environment with a read lock held.
    ///
    /// This is how job handlers read application state; they downcast via
    /// `Environment::as_any`.
    pub async fn read<R>(&self, f: impl FnOnce(&dyn Environment) -> R) -> R {
        let state = self.state.read().await;
        f(state.env.as_ref())
    }

    /// Runs a closure against the environment with the write lock held,
    /// invalidating the snapshot cache.
    pub async fn write<R>(&self, f: impl FnOnce(&mut dyn Environment) -> R) -> R {
        let mut state = self.state.write().await;
        state.snapshot_cache = None;
        f(state.env.as_mut())
    }
}
