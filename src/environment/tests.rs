//! Environment Module Tests
//!
//! Verifies the update total order, the lazily cached snapshot and its
//! invalidation on every mutation, and the demo `CounterEnvironment`.

#[cfg(test)]
mod tests {
    use crate::environment::shared::SharedEnvironment;
    use crate::environment::types::{
        CounterEnvironment, Environment, EnvironmentConfig, SerializedEnvironmentConfig,
    };

    use anyhow::Result;
    use std::any::Any;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn update(id: u64, key: &str, value: i64) -> SerializedEnvironmentConfig {
        let config = EnvironmentConfig::new(key, &value).unwrap();
        SerializedEnvironmentConfig {
            id,
            key: config.key,
            value: config.value,
        }
    }

    async fn counter_value(env: &SharedEnvironment) -> i64 {
        env.read(|e| {
            e.as_any()
                .downcast_ref::<CounterEnvironment>()
                .expect("counter environment")
                .x
        })
        .await
    }

    // ============================================================
    // TEST 1: CounterEnvironment directive handling
    // ============================================================

    #[test]
    fn test_counter_applies_set_and_add() {
        let mut counter = CounterEnvironment::default();

        let set = EnvironmentConfig::new("set", &5i64).unwrap();
        counter.apply_update(&set.key, &set.value).unwrap();
        assert_eq!(counter.x, 5);

        let add = EnvironmentConfig::new("add", &3i64).unwrap();
        counter.apply_update(&add.key, &add.value).unwrap();
        assert_eq!(counter.x, 8);
    }

    #[test]
    fn test_counter_rejects_unknown_key() {
        let mut counter = CounterEnvironment::default();
        let bogus = EnvironmentConfig::new("multiply", &2i64).unwrap();

        let result = counter.apply_update(&bogus.key, &bogus.value);
        assert!(result.unwrap_err().to_string().contains("unknown"));
        assert_eq!(counter.x, 0);
    }

    #[test]
    fn test_counter_snapshot_round_trip() {
        let original = CounterEnvironment::new(42);
        let bytes = original.serialize().unwrap();

        let mut replica = CounterEnvironment::default();
        replica.deserialize(&bytes).unwrap();
        assert_eq!(replica.x, 42);
    }

    // ============================================================
    // TEST 2: SharedEnvironment versioning
    // ============================================================

    #[tokio::test]
    async fn test_apply_advances_update_id_in_order() {
        // ARRANGE
        let env = SharedEnvironment::new(Box::new(CounterEnvironment::default()));
        assert_eq!(env.update_id().await, 0);

        // ACT: Apply a batch in the coordinator-assigned order
        env.apply(&[update(1, "set", 5), update(2, "add", 2)])
            .await
            .unwrap();

        // ASSERT: Both directives applied, id at the batch's last position
        assert_eq!(env.update_id().await, 2);
        assert_eq!(counter_value(&env).await, 7);
    }

    #[tokio::test]
    async fn test_install_resets_update_order() {
        let env = SharedEnvironment::new(Box::new(CounterEnvironment::default()));
        env.apply(&[update(1, "set", 5)]).await.unwrap();
        assert_eq!(env.update_id().await, 1);

        env.install(Box::new(CounterEnvironment::new(100))).await;

        assert_eq!(env.update_id().await, 0);
        assert_eq!(counter_value(&env).await, 100);
    }

    #[tokio::test]
    async fn test_install_snapshot_replaces_state_wholesale() {
        let env = SharedEnvironment::new(Box::new(CounterEnvironment::default()));
        env.apply(&[update(1, "set", 5)]).await.unwrap();

        let snapshot = CounterEnvironment::new(9).serialize().unwrap();
        env.install_snapshot(&snapshot).await.unwrap();

        assert_eq!(counter_value(&env).await, 9);
        assert_eq!(env.update_id().await, 0);
    }

    // ============================================================
    // TEST 3: Snapshot caching
    // ============================================================

    /// Environment that counts how often it gets serialized.
    struct CountingEnvironment {
        x: i64,
        serializations: Arc<AtomicUsize>,
    }

    impl Environment for CountingEnvironment {
        fn apply_update(&mut self, _key: &str, value: &[u8]) -> Result<()> {
            self.x = EnvironmentConfig::decode(value)?;
            Ok(())
        }

        fn serialize(&self) -> Result<Vec<u8>> {
            self.serializations.fetch_add(1, Ordering::SeqCst);
            Ok(bincode::serialize(&self.x)?)
        }

        fn deserialize(&mut self, bytes: &[u8]) -> Result<()> {
            self.x = bincode::deserialize(bytes)?;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_until_mutation() {
        // ARRANGE
        let serializations = Arc::new(AtomicUsize::new(0));
        let env = SharedEnvironment::new(Box::new(CountingEnvironment {
            x: 1,
            serializations: serializations.clone(),
        }));

        // ACT: Snapshot twice without mutating
        let first = env.snapshot().await.unwrap();
        let second = env.snapshot().await.unwrap();

        // ASSERT: One serialization, identical bytes
        assert_eq!(first, second);
        assert_eq!(serializations.load(Ordering::SeqCst), 1);

        // ACT: Mutate, then snapshot again
        env.apply(&[update(1, "set", 2)]).await.unwrap();
        let third = env.snapshot().await.unwrap();

        // ASSERT: Cache was invalidated by the write
        assert_eq!(serializations.load(Ordering::SeqCst), 2);
        assert_ne!(first, third);
    }
}
