//! # Driver contract.
//!
//! A [`Driver`] knows how to turn a [`ConnectionDecl`] into a live [`Connection`].
//! Drivers are registered by kind in a [`DriverSet`]; the connection supervisor
//! picks the driver named by `decl.driver`.
//!
//! ## Example
//! ```rust
//! use std::any::Any;
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use shiva::{Connection, ConnectionDecl, ConnectionRef, Driver, PrepareError};
//!
//! struct Dummy(String);
//!
//! impl Connection for Dummy {
//!     fn name(&self) -> &str { &self.0 }
//!     fn driver(&self) -> &str { "dummy" }
//!     fn as_any(&self) -> &dyn Any { self }
//! }
//!
//! struct DummyDriver;
//!
//! #[async_trait]
//! impl Driver for DummyDriver {
//!     fn kind(&self) -> &str { "dummy" }
//!
//!     async fn prepare(&self, decl: &ConnectionDecl) -> Result<ConnectionRef, PrepareError> {
//!         Ok(Arc::new(Dummy(decl.name.clone())))
//!     }
//! }
//! ```

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::config::ConnectionDecl;
use crate::error::PrepareError;

/// A prepared connection handle.
pub trait Connection: Send + Sync + 'static {
    /// Registry name (the declaration's `name`).
    fn name(&self) -> &str;

    /// Kind of the driver that produced it.
    fn driver(&self) -> &str;

    /// Enables typed lookup through [`ConnectionRegistry::get_as`](super::ConnectionRegistry::get_as).
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a connection.
pub type ConnectionRef = Arc<dyn Connection>;

/// Prepares connections of one kind.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Kind matched against `ConnectionDecl::driver`.
    fn kind(&self) -> &str;

    async fn prepare(&self, decl: &ConnectionDecl) -> Result<ConnectionRef, PrepareError>;
}

/// Drivers keyed by kind. A later registration of the same kind replaces the earlier one.
#[derive(Clone, Default)]
pub struct DriverSet {
    drivers: IndexMap<String, Arc<dyn Driver>>,
}

impl DriverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding the built-in drivers.
    pub fn builtin() -> Self {
        Self::new().with(Arc::new(super::memory::MemoryDriver))
    }

    pub fn with(mut self, driver: Arc<dyn Driver>) -> Self {
        self.register(driver);
        self
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.kind().to_string(), driver);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Driver>> {
        self.drivers.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}
