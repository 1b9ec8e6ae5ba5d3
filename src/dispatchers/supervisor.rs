//! # Dispatcher supervisor.
//!
//! Instantiates every declared dispatcher, collects their root work units on
//! start, and stops them one by one at shutdown.
//!
//! ## Ordering
//! ```text
//! registry:  type A ─► [a1, a2]      (types in first-declared order,
//!            type B ─► [b1]           instances in declared order)
//!
//! start():    a1.start ─► a2.start ─► b1.start      (units concatenated)
//! stop_all(): a1.stop  ─► a2.stop  ─► b1.stop       (strictly sequential)
//! ```

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, error, info};

use crate::config::DispatcherDecl;
use crate::error::{PrepareError, WorkError};
use crate::events::{Bus, Event, EventKind};
use crate::work::WorkRef;

use super::dispatcher::{DispatcherContext, DispatcherRef, DispatcherSet};

/// Prepared dispatcher instances, keyed by type then instance name.
#[derive(Clone, Default)]
pub struct DispatcherRegistry {
    types: IndexMap<String, IndexMap<String, DispatcherRef>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: &str, name: &str) -> Option<&DispatcherRef> {
        self.types.get(kind).and_then(|inst| inst.get(name))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// `(type, instance, dispatcher)` in type-then-instance order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &DispatcherRef)> {
        self.types.iter().flat_map(|(kind, instances)| {
            instances
                .iter()
                .map(move |(name, d)| (kind.as_str(), name.as_str(), d))
        })
    }

    /// Total number of instances.
    pub fn len(&self) -> usize {
        self.types.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DispatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|(kind, name, _)| format!("{kind}.{name}")))
            .finish()
    }
}

/// Result of stopping one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStop {
    /// `type.instance`
    pub dispatcher: String,
    pub error: Option<WorkError>,
}

/// Drives dispatcher preparation, start and stop.
#[derive(Clone)]
pub struct DispatcherSupervisor {
    factories: DispatcherSet,
    bus: Bus,
}

impl DispatcherSupervisor {
    pub fn new(factories: DispatcherSet, bus: Bus) -> Self {
        Self { factories, bus }
    }

    /// Instantiates every declaration; none is started.
    pub async fn prepare(
        &self,
        decls: &[DispatcherDecl],
        ctx: &DispatcherContext,
    ) -> Result<DispatcherRegistry, PrepareError> {
        self.check(decls)?;

        let mut registry = DispatcherRegistry::new();
        for decl in decls {
            let Some(factory) = self.factories.get(&decl.kind) else {
                return Err(unknown_type(decl));
            };
            let qualified = decl.qualified_name();
            debug!(dispatcher = %qualified, "preparing dispatcher");
            let instance = factory.prepare(decl, ctx).await?;

            info!(dispatcher = %qualified, "dispatcher prepared");
            self.bus
                .publish(Event::new(EventKind::DispatcherPrepared).with_subject(qualified));
            registry
                .types
                .entry(decl.kind.clone())
                .or_default()
                .insert(decl.name.clone(), instance);
        }
        Ok(registry)
    }

    /// Starts every instance in order and concatenates their root units.
    ///
    /// The first failing `start` aborts the call.
    pub async fn start(&self, registry: &DispatcherRegistry) -> Result<Vec<WorkRef>, WorkError> {
        let mut units = Vec::new();
        for (kind, name, dispatcher) in registry.iter() {
            match dispatcher.start().await {
                Ok(mut produced) => {
                    debug!(dispatcher = %format!("{kind}.{name}"), units = produced.len(), "dispatcher started");
                    units.append(&mut produced);
                }
                Err(e) => {
                    error!(dispatcher = %format!("{kind}.{name}"), error = %e, "dispatcher failed to start");
                    return Err(e);
                }
            }
        }
        Ok(units)
    }

    /// Stops every instance exactly once, sequentially, in registry order.
    ///
    /// A failing `stop` is logged and recorded; the remaining instances are still stopped.
    pub async fn stop_all(&self, registry: &DispatcherRegistry) -> Vec<DispatcherStop> {
        let mut stopped = Vec::with_capacity(registry.len());
        for (kind, name, dispatcher) in registry.iter() {
            let qualified = format!("{kind}.{name}");
            info!(dispatcher = %qualified, "stopping dispatcher");
            self.bus.publish(
                Event::new(EventKind::DispatcherStopping).with_subject(qualified.as_str()),
            );

            let res = dispatcher.stop().await;
            let mut ev = Event::new(EventKind::DispatcherStopped).with_subject(qualified.as_str());
            if let Err(e) = &res {
                error!(dispatcher = %qualified, error = %e, "dispatcher stop failed");
                ev = ev.with_reason(e.to_string());
            }
            self.bus.publish(ev);
            stopped.push(DispatcherStop {
                dispatcher: qualified,
                error: res.err(),
            });
        }
        stopped
    }

    fn check(&self, decls: &[DispatcherDecl]) -> Result<(), PrepareError> {
        let mut seen = HashSet::with_capacity(decls.len());
        for decl in decls {
            if decl.kind.trim().is_empty() || decl.name.trim().is_empty() {
                return Err(PrepareError::Invalid {
                    reason: "dispatcher type and name must not be empty".into(),
                });
            }
            if self.factories.get(&decl.kind).is_none() {
                return Err(unknown_type(decl));
            }
            if !seen.insert((decl.kind.as_str(), decl.name.as_str())) {
                return Err(PrepareError::Duplicate {
                    what: "dispatcher",
                    name: decl.qualified_name(),
                });
            }
        }
        Ok(())
    }
}

fn unknown_type(decl: &DispatcherDecl) -> PrepareError {
    PrepareError::UnknownDispatcher {
        kind: decl.kind.clone(),
        instance: decl.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatchers::{Dispatcher, DispatcherFactory};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: String,
        journal: Journal,
        fail_stop: bool,
    }

    #[async_trait]
    impl Dispatcher for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) -> Result<Vec<WorkRef>, WorkError> {
            self.journal.lock().push(format!("start {}", self.name));
            Ok(Vec::new())
        }

        async fn stop(&self) -> Result<(), WorkError> {
            tokio::task::yield_now().await;
            self.journal.lock().push(format!("stop {}", self.name));
            if self.fail_stop {
                return Err(WorkError::fail("stuck"));
            }
            Ok(())
        }
    }

    struct RecordingFactory {
        kind: &'static str,
        journal: Journal,
    }

    #[async_trait]
    impl DispatcherFactory for RecordingFactory {
        fn kind(&self) -> &str {
            self.kind
        }

        async fn prepare(
            &self,
            decl: &DispatcherDecl,
            _ctx: &DispatcherContext,
        ) -> Result<DispatcherRef, PrepareError> {
            self.journal.lock().push(format!("prepare {}", decl.qualified_name()));
            Ok(Arc::new(Recording {
                name: decl.name.clone(),
                journal: Arc::clone(&self.journal),
                fail_stop: decl.name == "bad",
            }))
        }
    }

    fn supervisor(journal: &Journal) -> DispatcherSupervisor {
        let set = DispatcherSet::new()
            .with(Arc::new(RecordingFactory {
                kind: "http",
                journal: Arc::clone(journal),
            }))
            .with(Arc::new(RecordingFactory {
                kind: "queue",
                journal: Arc::clone(journal),
            }));
        DispatcherSupervisor::new(set, Bus::new(64))
    }

    #[tokio::test]
    async fn type_then_instance_order_everywhere() {
        let journal = Journal::default();
        let sup = supervisor(&journal);
        let reg = sup
            .prepare(
                &[
                    DispatcherDecl::new("http", "api"),
                    DispatcherDecl::new("queue", "jobs"),
                    DispatcherDecl::new("http", "admin"),
                ],
                &DispatcherContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.kinds().collect::<Vec<_>>(), vec!["http", "queue"]);

        assert!(sup.start(&reg).await.unwrap().is_empty());
        let stopped = sup.stop_all(&reg).await;
        assert_eq!(
            stopped.iter().map(|s| s.dispatcher.as_str()).collect::<Vec<_>>(),
            vec!["http.api", "http.admin", "queue.jobs"]
        );
        assert_eq!(
            *journal.lock(),
            vec![
                "prepare http.api",
                "prepare queue.jobs",
                "prepare http.admin",
                "start api",
                "start admin",
                "start jobs",
                "stop api",
                "stop admin",
                "stop jobs",
            ]
        );
    }

    #[tokio::test]
    async fn failing_stop_does_not_skip_the_rest() {
        let journal = Journal::default();
        let sup = supervisor(&journal);
        let reg = sup
            .prepare(
                &[DispatcherDecl::new("http", "bad"), DispatcherDecl::new("http", "good")],
                &DispatcherContext::default(),
            )
            .await
            .unwrap();
        let stopped = sup.stop_all(&reg).await;
        assert_eq!(stopped[0].error, Some(WorkError::fail("stuck")));
        assert_eq!(stopped[1].error, None);
    }

    #[tokio::test]
    async fn configuration_errors_before_any_factory_runs() {
        let journal = Journal::default();
        let sup = supervisor(&journal);
        let ctx = DispatcherContext::default();

        let err = sup
            .prepare(
                &[DispatcherDecl::new("http", "api"), DispatcherDecl::new("grpc", "api")],
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PrepareError::UnknownDispatcher { ref kind, .. } if kind == "grpc"));

        let err = sup
            .prepare(
                &[DispatcherDecl::new("http", "api"), DispatcherDecl::new("http", "api")],
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate dispatcher `http.api`");

        sup.prepare(
            &[DispatcherDecl::new("http", "api"), DispatcherDecl::new("queue", "api")],
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(journal.lock().len(), 2);
    }
}
