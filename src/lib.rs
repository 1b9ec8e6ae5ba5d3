//! # shiva
//!
//! **Shiva** is a pluggable-component process supervisor.
//!
//! For each named *scope* it builds an ordered chain of candidate extension
//! sources, prepares connections and then dispatchers from a declarative
//! configuration, runs the dispatchers' root work concurrently, and performs a
//! coordinated, selective shutdown on a signal or when the work is done.
//!
//! ## Architecture
//! ```text
//!   Config (TOML)
//!      │
//!      ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Daemon::prepare()                                                    │
//! │   scopes:      PackageValidator ─► ScopeChainBuilder ─► ScopeResolver│
//! │   connections: ConnectionSupervisor ─► Driver::prepare (sequential)  │
//! │   dispatchers: DispatcherSupervisor ─► DispatcherFactory::prepare    │
//! └──────────────────────────────┬───────────────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Daemon::run()                                                        │
//! │   "Shiva.wait_coro" (infrastructure)                                 │
//! │      start() ─► [WorkRef] ─► TaskRegistry::spawn_work ─► join ALL    │
//! │   liveness loop: halt token | poll_interval                          │
//! └──────────────────────────────┬───────────────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Daemon::stop_async()  (exactly once)                                 │
//! │   1. Dispatcher::stop, type then instance, sequential                │
//! │   2. TaskRegistry::cancel_outstanding(AllowList)                     │
//! └──────────────────────────────────────────────────────────────────────┘
//!
//! Every step publishes an Event on the Bus ─► SubscriberSet ─► LogWriter, custom...
//! ```
//!
//! ## Example
//! ```rust
//! use shiva::{Config, DaemonBuilder, StopReason};
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = Config::from_toml_str(r#"
//!     [[connections]]
//!     name = "cache"
//!     driver = "memory"
//!
//!     [[dispatchers]]
//!     type = "timer"
//!     name = "beat"
//!     [dispatchers.options]
//!     interval_ms = 100
//!     ticks = 3
//!     connection = "cache"
//! "#)?;
//!
//! let daemon = DaemonBuilder::new(cfg).build();
//! daemon.prepare().await?;
//! let report = daemon.run().await?;
//! assert_eq!(report.reason, StopReason::RootWorkCompleted);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connections;
pub mod core;
pub mod dispatchers;
pub mod error;
pub mod events;
pub mod scopes;
pub mod subscribers;
pub mod work;

pub use config::{Config, ConnectionDecl, DispatcherDecl, Options};
pub use connections::{
    Connection, ConnectionRef, ConnectionRegistry, ConnectionSupervisor, Driver, DriverSet,
    MEMORY_DRIVER, MemoryConnection, MemoryDriver,
};
pub use crate::core::{
    CliSession, CommandContext, Daemon, DaemonBuilder, DaemonState, RunReport, ShutdownReport,
    StopReason,
};
pub use dispatchers::{
    Dispatcher, DispatcherContext, DispatcherFactory, DispatcherRef, DispatcherRegistry,
    DispatcherSet, DispatcherStop, DispatcherSupervisor, TIMER_DISPATCHER, TimerDispatcher,
    TimerFactory,
};
pub use error::{ConfigError, PrepareError, PreparePhase, RuntimeError, WorkError};
pub use events::{Bus, Event, EventKind};
pub use scopes::{
    CandidateChain, CatalogProbe, CatalogResolver, ModuleCatalog, PackageProbe, PackageValidator,
    ResolvedScope, ScopeChainBuilder, ScopeRegistry, ScopeResolver,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use work::{AllowList, TaskClass, TaskRegistry, Work, WorkFn, WorkOutcome, WorkRef};
