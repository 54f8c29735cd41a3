use anyhow::Result;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::any::Any;

/// Application-defined shared state that jobs execute against.
///
/// Implementations hold whatever the application needs (lexicons, model
/// weights, counters); the engine only ever moves their serialized form
/// around and applies named update directives to them.
///
/// The versioning machinery (update ids, snapshot caching) lives in
/// [`shared::SharedEnvironment`](super::shared::SharedEnvironment), which
/// composes any implementation of this trait rather than requiring a base
/// type to extend.
pub trait Environment: Send + Sync + 'static {
    /// Applies one named mutation directive. `value` is the serialized form
    /// produced once on the coordinator; the implementation decodes it.
    fn apply_update(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// Serializes the full state for a snapshot push.
    fn serialize(&self) -> Result<Vec<u8>>;

    /// Replaces the full state wholesale from snapshot bytes.
    fn deserialize(&mut self, bytes: &[u8]) -> Result<()>;

    /// Downcast hook so job handlers can reach the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// One named mutation directive, as submitted by the application.
///
/// The value is serialized exactly once, at construction on the coordinator;
/// workers decode it inside their `Environment::apply_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub key: String,
    pub value: Vec<u8>,
}

impl EnvironmentConfig {
    /// Builds a directive, serializing `value` with bincode.
    pub fn new<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            value: bincode::serialize(value)?,
        })
    }

    /// Decodes a directive value on the applying side.
    pub fn decode<T: DeserializeOwned>(value: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(value)?)
    }
}

/// A directive stamped with its position in the global update order.
///
/// Built once by the coordinator; the identical struct is fanned out to every
/// worker, so the coordinator pays one serialization cost total while each
/// worker pays one deserialization cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedEnvironmentConfig {
    /// Position in the update total order. Monotonic per boundary epoch,
    /// reset to zero by a successful full-environment setup.
    pub id: u64,
    pub key: String,
    pub value: Vec<u8>,
}

/// Minimal environment holding a single integer, used by the demo binary and
/// the test suite.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CounterEnvironment {
    pub x: i64,
}

impl CounterEnvironment {
    pub fn new(x: i64) -> Self {
        Self { x }
    }
}

impl Environment for CounterEnvironment {
    fn apply_update(&mut self, key: &str, value: &[u8]) -> Result<()> {
        match key {
            "set" => {
                self.x = EnvironmentConfig::decode(value)?;
                Ok(())
            }
            "add" => {
                let delta: i64 = EnvironmentConfig::decode(value)?;
                self.x += delta;
                Ok(())
            }
            other => Err(anyhow::anyhow!("unknown environment key: {}", other)),
        }
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<()> {
        *self = bincode::deserialize(bytes)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
