//! Lifecycle events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Daemon`, `PackageValidator`, `ConnectionSupervisor`,
//!   `DispatcherSupervisor`, `TaskRegistry`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the daemon's subscriber listener, which fans out to `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
