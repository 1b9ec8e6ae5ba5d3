//! # Dispatcher contract.
//!
//! A [`Dispatcher`] is a long-running component that produces root work units
//! once started. Instances are created by a [`DispatcherFactory`] registered
//! under a type name in a [`DispatcherSet`].
//!
//! ```text
//! DispatcherDecl ──► DispatcherFactory::prepare(decl, ctx) ──► DispatcherRef
//!                                                                 │
//!                             start() ──► Vec<WorkRef> ◄──────────┤
//!                             stop()  ──► returns once work ended ◄┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::config::DispatcherDecl;
use crate::connections::ConnectionRegistry;
use crate::error::{PrepareError, WorkError};
use crate::scopes::ScopeRegistry;
use crate::work::WorkRef;

/// A live dispatcher instance.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Instance name.
    fn name(&self) -> &str;

    /// Produces the instance's root work units. Called once per run.
    ///
    /// The caller schedules the returned units; the dispatcher must not spawn them itself.
    async fn start(&self) -> Result<Vec<WorkRef>, WorkError>;

    /// Completes when the instance has ceased work.
    async fn stop(&self) -> Result<(), WorkError>;
}

/// Shared handle to a dispatcher instance.
pub type DispatcherRef = Arc<dyn Dispatcher>;

/// Read access to what was prepared before dispatchers.
#[derive(Clone, Default)]
pub struct DispatcherContext {
    pub connections: Arc<ConnectionRegistry>,
    pub scopes: Arc<ScopeRegistry>,
}

/// Creates dispatcher instances of one type.
#[async_trait]
pub trait DispatcherFactory: Send + Sync + 'static {
    /// Type name matched against `DispatcherDecl::kind`.
    fn kind(&self) -> &str;

    async fn prepare(
        &self,
        decl: &DispatcherDecl,
        ctx: &DispatcherContext,
    ) -> Result<DispatcherRef, PrepareError>;
}

/// Factories keyed by type. A later registration of the same type replaces the earlier one.
#[derive(Clone, Default)]
pub struct DispatcherSet {
    factories: IndexMap<String, Arc<dyn DispatcherFactory>>,
}

impl DispatcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding the built-in dispatchers.
    pub fn builtin() -> Self {
        Self::new().with(Arc::new(super::timer::TimerFactory))
    }

    pub fn with(mut self, factory: Arc<dyn DispatcherFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn register(&mut self, factory: Arc<dyn DispatcherFactory>) {
        self.factories.insert(factory.kind().to_string(), factory);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn DispatcherFactory>> {
        self.factories.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
