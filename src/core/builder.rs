//! # Builder for [`Daemon`] and [`CliSession`].
//!
//! Collects the pluggable parts (subscribers, module catalog, probe, resolver,
//! drivers, dispatcher factories, extra allow-list entries) and wires them to a
//! shared event bus and task registry.
//!
//! ## Example
//! ```rust
//! use shiva::{Config, DaemonBuilder, LogWriter};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let daemon = DaemonBuilder::new(Config::default())
//!     .with_subscribers(vec![Arc::new(LogWriter::default())])
//!     .with_allow_list(["Host.main"])
//!     .build();
//! daemon.prepare().await.unwrap();
//! assert!(daemon.allow_list().matches("Host.main.loop").is_some());
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::config::Config;
use crate::connections::{ConnectionSupervisor, Driver, DriverSet};
use crate::dispatchers::{DispatcherFactory, DispatcherSet, DispatcherSupervisor};
use crate::events::Bus;
use crate::scopes::{
    BUILTIN_ROOT, CatalogProbe, CatalogResolver, ModuleCatalog, PackageProbe, PackageValidator, ScopeChainBuilder,
    ScopeResolver,
};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::work::{AllowList, TaskClass, TaskRegistry};

use super::cli::CliSession;
use super::daemon::Daemon;

/// Task identity of the bus-to-subscribers forwarder.
pub const EVENTS_IDENTITY: &str = "Shiva.events";

/// Builder for [`Daemon`] and [`CliSession`].
pub struct DaemonBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    catalog: ModuleCatalog,
    probe: Option<Arc<dyn PackageProbe>>,
    resolver: Option<Arc<dyn ScopeResolver>>,
    drivers: DriverSet,
    dispatchers: DispatcherSet,
    allow: Vec<String>,
    root: Option<String>,
}

struct Parts {
    cfg: Config,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    tasks: Arc<TaskRegistry>,
    chains: ScopeChainBuilder,
    resolver: Arc<dyn ScopeResolver>,
    drivers: DriverSet,
    dispatchers: DispatcherSet,
    allow: AllowList,
}

impl DaemonBuilder {
    /// Starts from the built-in catalog, drivers and dispatchers.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            catalog: ModuleCatalog::new(),
            probe: None,
            resolver: None,
            drivers: DriverSet::builtin(),
            dispatchers: DispatcherSet::builtin(),
            allow: Vec::new(),
            root: None,
        }
    }

    /// Sets event subscribers; each gets its own worker and bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the module catalog used by the default probe and resolver.
    ///
    /// Driver and dispatcher kinds are still registered under the built-in root at build time.
    pub fn with_catalog(mut self, catalog: ModuleCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Registers one more module in the catalog.
    pub fn with_module<I, S>(mut self, path: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.catalog.register(path, items);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn PackageProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ScopeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.drivers.register(driver);
        self
    }

    pub fn with_dispatcher(mut self, factory: Arc<dyn DispatcherFactory>) -> Self {
        self.dispatchers.register(factory);
        self
    }

    /// Adds host task identities exempt from shutdown cancellation.
    pub fn with_allow_list<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Overrides the built-in scope prefix (`shiva`).
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Builds the daemon. Must be called inside a tokio runtime.
    pub fn build(self) -> Arc<Daemon> {
        let p = self.parts();
        Arc::new(Daemon::new_internal(
            p.cfg,
            p.bus.clone(),
            p.subs,
            p.tasks,
            p.allow,
            p.chains,
            p.resolver,
            ConnectionSupervisor::new(p.drivers, p.bus.clone()),
            DispatcherSupervisor::new(p.dispatchers, p.bus),
        ))
    }

    /// Builds a one-shot command session. Must be called inside a tokio runtime.
    pub fn build_cli(self) -> CliSession {
        let p = self.parts();
        CliSession {
            cfg: p.cfg,
            bus: p.bus.clone(),
            subs: p.subs,
            tasks: p.tasks,
            chains: p.chains,
            resolver: p.resolver,
            connection_sup: ConnectionSupervisor::new(p.drivers, p.bus),
        }
    }

    fn parts(self) -> Parts {
        let bus = Bus::new(self.cfg.daemon.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let tasks = Arc::new(TaskRegistry::new(bus.clone()));
        subscriber_listener(&tasks, &bus, &subs);

        let root = self.root.as_deref().unwrap_or(BUILTIN_ROOT);
        let mut catalog = self.catalog;
        catalog.register(format!("{root}.drivers"), self.drivers.kinds());
        catalog.register(format!("{root}.dispatchers"), self.dispatchers.kinds());
        let catalog = Arc::new(catalog);
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(CatalogProbe::new(Arc::clone(&catalog))));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(CatalogResolver::new(Arc::clone(&catalog))));

        let mut chains = ScopeChainBuilder::new(PackageValidator::new(probe, bus.clone()));
        if let Some(root) = self.root {
            chains = chains.with_root(root);
        }

        let mut allow = AllowList::default();
        allow.extend(self.cfg.daemon.allow_list.iter().map(String::as_str));
        allow.extend(self.allow);

        Parts {
            cfg: self.cfg,
            bus,
            subs,
            tasks,
            chains,
            resolver,
            drivers: self.drivers,
            dispatchers: self.dispatchers,
            allow,
        }
    }
}

/// Forwards bus events to the subscriber set (fire-and-forget).
fn subscriber_listener(tasks: &TaskRegistry, bus: &Bus, subs: &Arc<SubscriberSet>) {
    if subs.is_empty() {
        return;
    }
    let mut rx = bus.subscribe();
    let set = Arc::clone(subs);
    tasks.spawn(EVENTS_IDENTITY, TaskClass::Infrastructure, move |_| async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(&ev),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
