//! # Built-in `timer` dispatcher.
//!
//! Each instance yields one root unit named `timer.{instance}` that ticks every
//! `interval_ms`.
//!
//! Options:
//! - `interval_ms` (integer, default 1000, minimum 1)
//! - `ticks` (integer, optional): the unit completes after this many ticks
//! - `connection` (string, optional): a `memory` connection that receives the
//!   running tick count under `"{instance}.ticks"`
//!
//! `stop()` halts the unit and returns once it is no longer ticking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::DispatcherDecl;
use crate::connections::{ConnectionRef, MemoryConnection};
use crate::error::{PrepareError, WorkError};
use crate::work::{BoxWorkFuture, Work, WorkRef};

use super::dispatcher::{Dispatcher, DispatcherContext, DispatcherFactory, DispatcherRef};

/// Type name of the built-in timer dispatcher.
pub const TIMER_DISPATCHER: &str = "timer";

const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Factory for [`TimerDispatcher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerFactory;

#[async_trait]
impl DispatcherFactory for TimerFactory {
    fn kind(&self) -> &str {
        TIMER_DISPATCHER
    }

    async fn prepare(
        &self,
        decl: &DispatcherDecl,
        ctx: &DispatcherContext,
    ) -> Result<DispatcherRef, PrepareError> {
        let owner = decl.qualified_name();
        let interval_ms = decl.options.u64(&owner, "interval_ms")?.unwrap_or(DEFAULT_INTERVAL_MS);
        if interval_ms == 0 {
            return Err(PrepareError::Invalid {
                reason: format!("{owner}: option `interval_ms` must be positive"),
            });
        }
        let limit = decl.options.u64(&owner, "ticks")?;

        let store = match decl.options.str(&owner, "connection")? {
            None => None,
            Some(name) => {
                let conn = ctx.connections.get(name).ok_or_else(|| PrepareError::Invalid {
                    reason: format!("{owner}: unknown connection `{name}`"),
                })?;
                if conn.as_any().downcast_ref::<MemoryConnection>().is_none() {
                    return Err(PrepareError::Invalid {
                        reason: format!("{owner}: connection `{name}` is not a memory store"),
                    });
                }
                Some(Arc::clone(conn))
            }
        };

        Ok(Arc::new(TimerDispatcher::new(
            decl.name.clone(),
            Duration::from_millis(interval_ms),
            limit,
            store,
        )))
    }
}

struct Shared {
    name: String,
    interval: Duration,
    limit: Option<u64>,
    store: Option<ConnectionRef>,
    ticks: AtomicU64,
    halt: CancellationToken,
    active: watch::Sender<bool>,
}

impl Shared {
    fn tick(&self) -> u64 {
        let n = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(store) = self
            .store
            .as_ref()
            .and_then(|c| c.as_any().downcast_ref::<MemoryConnection>())
        {
            store.set(format!("{}.ticks", self.name), n.to_string());
        }
        trace!(timer = %self.name, tick = n, "tick");
        n
    }
}

/// Periodic ticker; see the module docs.
pub struct TimerDispatcher {
    shared: Arc<Shared>,
}

impl TimerDispatcher {
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        limit: Option<u64>,
        store: Option<ConnectionRef>,
    ) -> Self {
        let (active, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                interval,
                limit,
                store,
                ticks: AtomicU64::new(0),
                halt: CancellationToken::new(),
                active,
            }),
        }
    }

    /// Ticks recorded so far.
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Dispatcher for TimerDispatcher {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn start(&self) -> Result<Vec<WorkRef>, WorkError> {
        let unit = TimerUnit {
            identity: format!("{TIMER_DISPATCHER}.{}", self.shared.name),
            shared: Arc::clone(&self.shared),
        };
        Ok(vec![Arc::new(unit)])
    }

    async fn stop(&self) -> Result<(), WorkError> {
        self.shared.halt.cancel();
        let mut rx = self.shared.active.subscribe();
        // The sender lives in `shared`, so the channel cannot close here.
        let _ = rx.wait_for(|active| !*active).await;
        debug!(timer = %self.shared.name, ticks = self.ticks(), "timer stopped");
        Ok(())
    }
}

struct TimerUnit {
    identity: String,
    shared: Arc<Shared>,
}

/// Clears the active flag when the unit's future ends or is dropped.
struct ActiveGuard(Arc<Shared>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.send_replace(false);
    }
}

impl Work for TimerUnit {
    fn name(&self) -> &str {
        &self.identity
    }

    fn spawn(&self, ctx: CancellationToken) -> BoxWorkFuture {
        self.shared.active.send_replace(true);
        let guard = ActiveGuard(Arc::clone(&self.shared));
        Box::pin(async move {
            let shared = Arc::clone(&guard.0);
            loop {
                tokio::select! {
                    biased;
                    _ = shared.halt.cancelled() => return Ok(()),
                    _ = ctx.cancelled() => return Err(WorkError::Canceled),
                    _ = tokio::time::sleep(shared.interval) => {}
                }
                let n = shared.tick();
                if shared.limit.is_some_and(|limit| n >= limit) {
                    debug!(timer = %shared.name, ticks = n, "tick limit reached");
                    return Ok(());
                }
            }
        })
    }
}
