//! # Built-in `memory` driver.
//!
//! Produces an in-process key/value store. Useful for tests and for dispatchers
//! that need to share small amounts of state.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::ConnectionDecl;
use crate::error::PrepareError;

use super::driver::{Connection, ConnectionRef, Driver};

/// Kind of the built-in in-process driver.
pub const MEMORY_DRIVER: &str = "memory";

/// Driver for [`MemoryConnection`].
///
/// Options:
/// - `capacity` (integer, optional): maximum number of keys; inserting a new key
///   beyond it is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryDriver;

#[async_trait]
impl Driver for MemoryDriver {
    fn kind(&self) -> &str {
        MEMORY_DRIVER
    }

    async fn prepare(&self, decl: &ConnectionDecl) -> Result<ConnectionRef, PrepareError> {
        let capacity = decl.options.u64(&decl.name, "capacity")?;
        let capacity = match capacity {
            Some(0) => {
                return Err(PrepareError::Invalid {
                    reason: format!("{}: option `capacity` must be positive", decl.name),
                });
            }
            Some(n) => Some(usize::try_from(n).unwrap_or(usize::MAX)),
            None => None,
        };
        Ok(Arc::new(MemoryConnection::new(decl.name.clone(), capacity)))
    }
}

/// In-process key/value store.
#[derive(Debug)]
pub struct MemoryConnection {
    name: String,
    capacity: Option<usize>,
    data: Mutex<HashMap<String, String>>,
}

impl MemoryConnection {
    pub fn new(name: impl Into<String>, capacity: Option<usize>) -> Self {
        Self {
            name: name.into(),
            capacity,
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    /// Stores `value` under `key`; returns false if the store is full.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let mut data = self.data.lock();
        if let Some(cap) = self.capacity {
            if data.len() >= cap && !data.contains_key(&key) {
                return false;
            }
        }
        data.insert(key, value.into());
        true
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.data.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> &str {
        MEMORY_DRIVER
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;

    #[tokio::test]
    async fn prepares_store_with_capacity() {
        let decl = ConnectionDecl::new("cache", MEMORY_DRIVER)
            .with_options(Options::default().with("capacity", 1_i64));
        let conn = MemoryDriver.prepare(&decl).await.unwrap();
        assert_eq!(conn.name(), "cache");

        let store = conn.as_any().downcast_ref::<MemoryConnection>().unwrap();
        assert!(store.set("a", "1"));
        assert!(store.set("a", "2"));
        assert!(!store.set("b", "1"));
        assert_eq!(store.get("a").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        let decl = ConnectionDecl::new("cache", MEMORY_DRIVER)
            .with_options(Options::default().with("capacity", 0_i64));
        let err = MemoryDriver.prepare(&decl).await.err().unwrap();
        assert!(err.is_configuration());
    }
}
