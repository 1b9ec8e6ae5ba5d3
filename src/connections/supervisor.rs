//! # Connection supervisor.
//!
//! Prepares every declared connection through its driver, sequentially and in
//! declaration order, and collects the results into a [`ConnectionRegistry`].
//!
//! ## Rules
//! - Declarations are checked first (empty name, duplicate name, unknown driver);
//!   no driver runs if any check fails.
//! - Preparation is fail-fast: the first driver error aborts the rest.

use std::any::Any;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use crate::config::ConnectionDecl;
use crate::error::PrepareError;
use crate::events::{Bus, Event, EventKind};

use super::driver::{ConnectionRef, DriverSet};

/// Prepared connections keyed by name, in declaration order.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: IndexMap<String, ConnectionRef>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ConnectionRef> {
        self.connections.get(name)
    }

    /// Typed lookup; `None` if the name is unknown or the connection is of another type.
    pub fn get_as<T: Any>(&self, name: &str) -> Option<&T> {
        self.connections
            .get(name)
            .and_then(|c| c.as_any().downcast_ref::<T>())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConnectionRef)> {
        self.connections.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.connections.keys()).finish()
    }
}

/// Drives connection preparation.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    drivers: DriverSet,
    bus: Bus,
}

impl ConnectionSupervisor {
    pub fn new(drivers: DriverSet, bus: Bus) -> Self {
        Self { drivers, bus }
    }

    /// Validates `decls`, then prepares them one by one.
    pub async fn prepare(&self, decls: &[ConnectionDecl]) -> Result<ConnectionRegistry, PrepareError> {
        self.check(decls)?;

        let mut registry = ConnectionRegistry::new();
        for decl in decls {
            let Some(driver) = self.drivers.get(&decl.driver) else {
                return Err(unknown_driver(decl));
            };
            debug!(connection = %decl.name, driver = %decl.driver, "preparing connection");
            let conn = driver.prepare(decl).await?;

            info!(connection = %decl.name, driver = %decl.driver, "connection prepared");
            self.bus.publish(
                Event::new(EventKind::ConnectionPrepared)
                    .with_subject(decl.name.as_str())
                    .with_reason(decl.driver.as_str()),
            );
            registry.connections.insert(decl.name.clone(), conn);
        }
        Ok(registry)
    }

    fn check(&self, decls: &[ConnectionDecl]) -> Result<(), PrepareError> {
        let mut seen = IndexSet::with_capacity(decls.len());
        for decl in decls {
            if decl.name.trim().is_empty() {
                return Err(PrepareError::Invalid {
                    reason: "connection name must not be empty".into(),
                });
            }
            if !seen.insert(decl.name.as_str()) {
                return Err(PrepareError::Duplicate {
                    what: "connection",
                    name: decl.name.clone(),
                });
            }
            if self.drivers.get(&decl.driver).is_none() {
                return Err(unknown_driver(decl));
            }
        }
        Ok(())
    }
}

fn unknown_driver(decl: &ConnectionDecl) -> PrepareError {
    PrepareError::UnknownDriver {
        connection: decl.name.clone(),
        driver: decl.driver.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{Connection, Driver, MEMORY_DRIVER, MemoryConnection, MemoryDriver};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Refusing {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Driver for Refusing {
        fn kind(&self) -> &str {
            "refusing"
        }

        async fn prepare(&self, decl: &ConnectionDecl) -> Result<ConnectionRef, PrepareError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PrepareError::failed(&decl.name, "connection refused"))
        }
    }

    fn supervisor(calls: &Arc<AtomicUsize>) -> ConnectionSupervisor {
        let drivers = DriverSet::builtin().with(Arc::new(Refusing {
            calls: Arc::clone(calls),
        }));
        ConnectionSupervisor::new(drivers, Bus::new(16))
    }

    #[tokio::test]
    async fn prepares_in_declaration_order() {
        let sup = supervisor(&Arc::new(AtomicUsize::new(0)));
        let reg = sup
            .prepare(&[
                ConnectionDecl::new("b", MEMORY_DRIVER),
                ConnectionDecl::new("a", MEMORY_DRIVER),
            ])
            .await
            .unwrap();
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(reg.get_as::<MemoryConnection>("a").is_some());
        assert!(reg.get_as::<MemoryDriver>("a").is_none());
        assert_eq!(reg.get("b").unwrap().driver(), MEMORY_DRIVER);
    }

    #[tokio::test]
    async fn first_failure_aborts_the_rest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sup = supervisor(&calls);
        let err = sup
            .prepare(&[
                ConnectionDecl::new("db", "refusing"),
                ConnectionDecl::new("db2", "refusing"),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "`db` failed: connection refused");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn configuration_errors_before_any_driver_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sup = supervisor(&calls);

        let err = sup
            .prepare(&[
                ConnectionDecl::new("db", "refusing"),
                ConnectionDecl::new("db", MEMORY_DRIVER),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, PrepareError::Duplicate { what: "connection", .. }));

        let err = sup
            .prepare(&[
                ConnectionDecl::new("db", "refusing"),
                ConnectionDecl::new("q", "rabbitmq"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, PrepareError::UnknownDriver { ref driver, .. } if driver == "rabbitmq"));

        let err = sup.prepare(&[ConnectionDecl::new(" ", MEMORY_DRIVER)]).await.unwrap_err();
        assert_eq!(err.as_label(), "prepare_invalid");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
