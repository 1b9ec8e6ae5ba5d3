//! # Connections: drivers and the connection registry.
//!
//! - [`Driver`] / [`DriverSet`]: how a declared connection becomes a live handle
//! - [`ConnectionSupervisor`]: sequential, fail-fast preparation
//! - [`ConnectionRegistry`]: the prepared handles, shared read-only afterwards
//! - [`MemoryDriver`]: built-in in-process key/value store

mod driver;
mod memory;
mod supervisor;

pub use driver::{Connection, ConnectionRef, Driver, DriverSet};
pub use memory::{MEMORY_DRIVER, MemoryConnection, MemoryDriver};
pub use supervisor::{ConnectionRegistry, ConnectionSupervisor};
