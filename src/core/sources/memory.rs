//! Robot memory contract used by the body-sensor and perception sources.
//!
//! The real implementation talks to the robot's key/value memory service and
//! is provided by the embedding process. [`StaticMemory`] serves tests and
//! offline runs; [`DetachedMemory`] stands in when no robot API is wired.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

use super::error::{SourceError, SourceResult};

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Robot memory unavailable: {0}")]
    Unavailable(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Robot memory backend error: {0}")]
    Backend(String),
}

/// Read access to the robot's sensor memory.
#[async_trait::async_trait]
pub trait RobotMemory: Send + Sync {
    /// True once the memory service can be queried.
    async fn is_available(&self) -> bool;

    /// Reads the current value stored under `key`.
    async fn read(&self, key: &str) -> Result<Value, MemoryError>;

    /// Asks the platform to start the named extractor so that its keys get
    /// populated. Backends without extractors accept every request.
    async fn subscribe_extractor(&self, extractor: &str) -> Result<(), MemoryError> {
        let _ = extractor;
        Ok(())
    }
}

/// Map-backed memory.
#[derive(Debug, Default)]
pub struct StaticMemory {
    values: RwLock<HashMap<String, Value>>,
}

impl StaticMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

#[async_trait::async_trait]
impl RobotMemory for StaticMemory {
    async fn is_available(&self) -> bool {
        true
    }

    async fn read(&self, key: &str) -> Result<Value, MemoryError> {
        self.values
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| MemoryError::KeyNotFound(key.to_string()))
    }
}

/// Memory used when the process has no robot API.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedMemory;

#[async_trait::async_trait]
impl RobotMemory for DetachedMemory {
    async fn is_available(&self) -> bool {
        false
    }

    async fn read(&self, key: &str) -> Result<Value, MemoryError> {
        Err(MemoryError::Unavailable(format!(
            "no robot memory attached (key {})",
            key
        )))
    }
}

pub(crate) async fn read_value(memory: &dyn RobotMemory, key: &str) -> SourceResult<Value> {
    memory.read(key).await.map_err(|source| SourceError::Memory {
        key: key.to_string(),
        source,
    })
}

/// Reads a numeric key.
pub(crate) async fn read_f64(memory: &dyn RobotMemory, key: &str) -> SourceResult<f64> {
    let value = read_value(memory, key).await?;
    value.as_f64().ok_or_else(|| SourceError::ParseError {
        metric: key.to_string(),
        location: "robot memory".to_string(),
        reason: format!("expected a number, got {}", value),
    })
}

/// Reads a flag stored either as a boolean or as a number (non-zero is true).
pub(crate) async fn read_flag(memory: &dyn RobotMemory, key: &str) -> SourceResult<bool> {
    let value = read_value(memory, key).await?;
    match &value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        _ => Err(SourceError::ParseError {
            metric: key.to_string(),
            location: "robot memory".to_string(),
            reason: format!("expected a flag, got {}", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn static_memory_reads_what_was_set() {
        let memory = StaticMemory::new().with("Device/Battery", 0.5);
        assert_eq!(memory.read("Device/Battery").await.unwrap(), json!(0.5));
        assert!(matches!(
            memory.read("missing").await,
            Err(MemoryError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn detached_memory_is_unavailable() {
        assert!(!DetachedMemory.is_available().await);
        assert!(DetachedMemory.read("anything").await.is_err());
    }

    #[tokio::test]
    async fn flags_accept_booleans_and_numbers() {
        let memory = StaticMemory::new()
            .with("a", true)
            .with("b", 0)
            .with("c", 1.0)
            .with("d", "yes");

        assert!(read_flag(&memory, "a").await.unwrap());
        assert!(!read_flag(&memory, "b").await.unwrap());
        assert!(read_flag(&memory, "c").await.unwrap());
        assert!(read_flag(&memory, "d").await.is_err());
    }

    #[tokio::test]
    async fn non_numeric_value_is_a_parse_error() {
        let memory = StaticMemory::new().with("t", "hot");
        assert!(matches!(
            read_f64(&memory, "t").await,
            Err(SourceError::ParseError { .. })
        ));
    }
}
