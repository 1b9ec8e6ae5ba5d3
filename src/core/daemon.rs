//! # Daemon: preparation, run loop and coordinated shutdown.
//!
//! The [`Daemon`] owns the event bus, the task registry and the three
//! preparation subsystems (scopes, connections, dispatchers).
//!
//! ## Lifecycle
//! ```text
//! prepare():
//!   load_scopes(DAEMON_SCOPES, packages)      ─► ScopeRegistry          (phase: scopes)
//!   ConnectionSupervisor::prepare(decls)      ─► ConnectionRegistry     (phase: connections)
//!   DispatcherSupervisor::prepare(decls, ctx) ─► DispatcherRegistry     (phase: dispatchers)
//!   any error ─► Stopped, RuntimeError::Prepare { phase, .. }
//!   shutdown ran meanwhile ─► stop the new dispatchers, RuntimeError::InvalidState
//!
//! run():
//!   running = true
//!   spawn "Shiva.wait_coro" (infrastructure):
//!       units = DispatcherSupervisor::start()
//!       stop already requested ─► drop units (reported cancelled)
//!       spawn every unit (supervised) ─► join ALL ─► running = false, wake run loop
//!   loop while running and not halted:
//!       select! { halt.cancelled(), sleep(poll_interval) }
//!   stop_async()
//!
//! stop_async() (exactly once, concurrent callers share the result):
//!   1. stop every dispatcher instance, type then instance, sequentially
//!   2. cancel outstanding tasks except: the caller, infrastructure, allow-listed identities
//!   3. do not wait for cancelled tasks to unwind
//! ```
//!
//! A single root unit that ends early ends the whole run (fail-together).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::{OnceCell, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::connections::{ConnectionRegistry, ConnectionSupervisor};
use crate::dispatchers::{DispatcherContext, DispatcherRegistry, DispatcherSupervisor};
use crate::error::{PrepareError, PreparePhase, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::scopes::{DAEMON_SCOPES, ScopeChainBuilder, ScopeRegistry, ScopeResolver, load_scopes};
use crate::subscribers::SubscriberSet;
use crate::work::{AllowList, RootHandle, TaskClass, TaskRegistry, WorkOutcome};

use super::state::{DaemonState, RunReport, ShutdownReport, StopReason};

/// Task identity of the background root-work waiter.
pub const WAIT_CORO_IDENTITY: &str = "Shiva.wait_coro";
/// Task identity used by [`Daemon::spawn_run`].
pub const RUN_IDENTITY: &str = "Shiva.run";

/// Registries produced by a successful `prepare()`.
struct Prepared {
    scopes: Arc<ScopeRegistry>,
    connections: Arc<ConnectionRegistry>,
    dispatchers: Arc<DispatcherRegistry>,
}

/// Pluggable-component process supervisor.
///
/// Built by [`DaemonBuilder`](crate::DaemonBuilder); always used behind an `Arc`.
pub struct Daemon {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) subs: Arc<SubscriberSet>,
    pub(crate) tasks: Arc<TaskRegistry>,
    pub(crate) allow: AllowList,
    pub(crate) chains: ScopeChainBuilder,
    pub(crate) resolver: Arc<dyn ScopeResolver>,
    pub(crate) connection_sup: ConnectionSupervisor,
    pub(crate) dispatcher_sup: DispatcherSupervisor,

    prepared: OnceLock<Prepared>,
    running: AtomicBool,
    /// Advisory; set once the shutdown protocol has finished.
    stopped: AtomicBool,
    /// Wakes the run loop: fired by `stop()` and by the root-work join.
    halt: CancellationToken,
    reason: Mutex<Option<StopReason>>,
    outcomes: Mutex<Option<Vec<(String, WorkOutcome)>>>,
    state: watch::Sender<DaemonState>,
    shutdown: OnceCell<Arc<ShutdownReport>>,
}

impl Daemon {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_internal(
        cfg: Config,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        tasks: Arc<TaskRegistry>,
        allow: AllowList,
        chains: ScopeChainBuilder,
        resolver: Arc<dyn ScopeResolver>,
        connection_sup: ConnectionSupervisor,
        dispatcher_sup: DispatcherSupervisor,
    ) -> Self {
        let (state, _) = watch::channel(DaemonState::Created);
        Self {
            cfg,
            bus,
            subs,
            tasks,
            allow,
            chains,
            resolver,
            connection_sup,
            dispatcher_sup,
            prepared: OnceLock::new(),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            halt: CancellationToken::new(),
            reason: Mutex::new(None),
            outcomes: Mutex::new(None),
            state,
            shutdown: OnceCell::new(),
        }
    }

    /// Builds scope chains, then prepares connections, then dispatchers.
    ///
    /// On failure the daemon moves to `Stopped` and never runs.
    pub async fn prepare(&self) -> Result<(), RuntimeError> {
        self.transition("prepare", DaemonState::Created, DaemonState::Preparing)?;

        match self.prepare_phases().await {
            Ok(prepared) => {
                info!(
                    scopes = prepared.scopes.len(),
                    connections = prepared.connections.len(),
                    dispatchers = prepared.dispatchers.len(),
                    "daemon prepared"
                );
                // Committed under the state lock: a concurrent shutdown either sees
                // the registries or has already moved the daemon past `Preparing`.
                let mut slot = Some(prepared);
                self.state.send_if_modified(|s| {
                    if *s == DaemonState::Preparing {
                        if let Some(p) = slot.take() {
                            let _ = self.prepared.set(p);
                        }
                    }
                    false
                });
                match slot {
                    None => Ok(()),
                    Some(orphaned) => {
                        warn!("shutdown ran during preparation, stopping prepared dispatchers");
                        self.dispatcher_sup.stop_all(&orphaned.dispatchers).await;
                        Err(self.invalid("prepare"))
                    }
                }
            }
            Err((phase, source)) => {
                error!(%phase, error = %source, label = source.as_label(), "preparation failed");
                self.state.send_replace(DaemonState::Stopped);
                Err(RuntimeError::Prepare { phase, source })
            }
        }
    }

    async fn prepare_phases(&self) -> Result<Prepared, (PreparePhase, PrepareError)> {
        let scopes = load_scopes(
            &self.chains,
            self.resolver.as_ref(),
            DAEMON_SCOPES,
            self.cfg.scopes.packages.as_slice(),
            &self.bus,
        )
        .map_err(|e| (PreparePhase::Scopes, e))?;
        let scopes = Arc::new(scopes);

        let connections = self
            .connection_sup
            .prepare(&self.cfg.connections)
            .await
            .map_err(|e| (PreparePhase::Connections, e))?;
        let connections = Arc::new(connections);

        let ctx = DispatcherContext {
            connections: Arc::clone(&connections),
            scopes: Arc::clone(&scopes),
        };
        let dispatchers = self
            .dispatcher_sup
            .prepare(&self.cfg.dispatchers, &ctx)
            .await
            .map_err(|e| (PreparePhase::Dispatchers, e))?;

        Ok(Prepared {
            scopes,
            connections,
            dispatchers: Arc::new(dispatchers),
        })
    }

    /// Runs until stopped or until every root work unit has finished, then shuts down.
    pub async fn run(self: &Arc<Self>) -> Result<RunReport, RuntimeError> {
        if self.prepared.get().is_none() {
            return Err(self.invalid("run"));
        }
        self.transition("run", DaemonState::Preparing, DaemonState::Running)?;

        self.running.store(true, Ordering::SeqCst);
        if self.halt.is_cancelled() {
            info!("stop requested before run, skipping dispatcher start");
        } else {
            warn!("starting shiva");
            self.bus.publish(Event::new(EventKind::RunStarted));

            let this = Arc::clone(self);
            self.tasks
                .spawn(WAIT_CORO_IDENTITY, TaskClass::Infrastructure, move |_| {
                    this.wait_coro()
                });

            let poll = self.cfg.daemon.poll_interval();
            while self.running.load(Ordering::SeqCst) && !self.halt.is_cancelled() {
                tokio::select! {
                    _ = self.halt.cancelled() => {}
                    _ = tokio::time::sleep(poll) => trace!("daemon alive"),
                }
            }
        }

        let shutdown = self.stop_async().await;
        info!("stop_async done");

        let reason = self.reason.lock().clone().unwrap_or(StopReason::Requested);
        Ok(RunReport {
            reason,
            outcomes: self.outcomes.lock().clone(),
            shutdown,
        })
    }

    /// Spawns [`run`](Self::run) as the infrastructure task `Shiva.run`.
    pub fn spawn_run(self: &Arc<Self>) -> JoinHandle<Option<Result<RunReport, RuntimeError>>> {
        let this = Arc::clone(self);
        self.tasks
            .spawn(RUN_IDENTITY, TaskClass::Infrastructure, move |_| async move {
                this.run().await
            })
    }

    /// Starts dispatchers, schedules their root units and joins all of them.
    async fn wait_coro(self: Arc<Self>) {
        info!("coro waiter started");
        let Some(prepared) = self.prepared.get() else {
            self.finish(StopReason::RootWorkCompleted);
            return;
        };

        let units = match self.dispatcher_sup.start(&prepared.dispatchers).await {
            Ok(units) => units,
            Err(e) => {
                error!(error = %e, "dispatcher start failed");
                self.finish(StopReason::StartFailed(e));
                return;
            }
        };

        if self.halt.is_cancelled() {
            warn!(units = units.len(), "stop requested during dispatcher start, dropping root work");
            *self.outcomes.lock() = Some(
                units
                    .iter()
                    .map(|unit| (unit.name().to_string(), WorkOutcome::Cancelled))
                    .collect(),
            );
            self.finish(StopReason::Requested);
            return;
        }

        let handles: Vec<RootHandle> = units
            .iter()
            .map(|unit| {
                debug!(unit = unit.name(), "scheduling root work");
                self.bus
                    .publish(Event::new(EventKind::RootWorkStarted).with_subject(unit.name()));
                self.tasks.spawn_work(unit)
            })
            .collect();

        let bus = &self.bus;
        let outcomes = futures::future::join_all(handles.into_iter().map(|h| async move {
            let (name, outcome) = h.join().await;
            match &outcome {
                WorkOutcome::Completed | WorkOutcome::Cancelled => {
                    info!(unit = %name, outcome = outcome.as_label(), "root work finished")
                }
                WorkOutcome::Failed(e) => {
                    error!(unit = %name, error = %e, "root work failed")
                }
                WorkOutcome::Panicked(msg) => {
                    error!(unit = %name, panic = %msg, "root work panicked")
                }
            }
            bus.publish(
                Event::new(EventKind::RootWorkFinished)
                    .with_subject(name.as_str())
                    .with_reason(outcome.as_label()),
            );
            (name, outcome)
        }))
        .await;

        error!(units = outcomes.len(), "root coro waiter stopped");
        self.bus
            .publish(Event::new(EventKind::RootWorkJoined).with_count(outcomes.len()));
        *self.outcomes.lock() = Some(outcomes);
        self.finish(StopReason::RootWorkCompleted);
    }

    /// Requests a stop; does not wait.
    pub fn stop(&self) {
        self.record_reason(StopReason::Requested);
        self.running.store(false, Ordering::SeqCst);
        if !self.halt.is_cancelled() {
            warn!("stop command received");
            self.bus.publish(Event::new(EventKind::StopRequested));
        }
        self.halt.cancel();
    }

    /// Runs the shutdown protocol exactly once; every caller gets the same report.
    pub async fn stop_async(&self) -> Arc<ShutdownReport> {
        self.shutdown
            .get_or_init(|| async { Arc::new(self.shutdown_protocol().await) })
            .await
            .clone()
    }

    async fn shutdown_protocol(&self) -> ShutdownReport {
        self.stop();
        self.state.send_replace(DaemonState::Stopping);
        info!("stopping");
        self.bus.publish(Event::new(EventKind::ShutdownStarted));

        let dispatchers = match self.prepared.get() {
            Some(prepared) => self.dispatcher_sup.stop_all(&prepared.dispatchers).await,
            None => Vec::new(),
        };
        let tasks = self.tasks.cancel_outstanding(&self.allow);

        self.stopped.store(true, Ordering::SeqCst);
        self.state.send_replace(DaemonState::Stopped);
        info!(
            cancelled = tasks.cancelled.len(),
            exempted = tasks.exempted.len(),
            "shiva stopped"
        );
        self.bus
            .publish(Event::new(EventKind::ShutdownCompleted).with_count(tasks.cancelled.len()));
        ShutdownReport { dispatchers, tasks }
    }

    /// Spawns a host task that the shutdown pass never cancels.
    pub fn spawn_infrastructure<Fut>(
        &self,
        identity: impl Into<Arc<str>>,
        fut: Fut,
    ) -> JoinHandle<Option<Fut::Output>>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.tasks
            .spawn(identity, TaskClass::Infrastructure, move |_| fut)
    }

    /// Spawns supervised work; the token fires when the shutdown pass cancels it.
    pub fn spawn_supervised<F, Fut>(
        &self,
        identity: impl Into<Arc<str>>,
        make: F,
    ) -> JoinHandle<Option<Fut::Output>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.tasks.spawn(identity, TaskClass::Supervised, make)
    }

    pub fn state(&self) -> DaemonState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True once the shutdown protocol has completed.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.reason.lock().clone()
    }

    /// Root-work outcomes, once the join has finished.
    pub fn outcomes(&self) -> Option<Vec<(String, WorkOutcome)>> {
        self.outcomes.lock().clone()
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow
    }

    /// Number of registered event subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }

    pub fn scopes(&self) -> Option<Arc<ScopeRegistry>> {
        self.prepared.get().map(|p| Arc::clone(&p.scopes))
    }

    pub fn connections(&self) -> Option<Arc<ConnectionRegistry>> {
        self.prepared.get().map(|p| Arc::clone(&p.connections))
    }

    pub fn dispatchers(&self) -> Option<Arc<DispatcherRegistry>> {
        self.prepared.get().map(|p| Arc::clone(&p.dispatchers))
    }

    fn finish(&self, reason: StopReason) {
        self.record_reason(reason);
        self.running.store(false, Ordering::SeqCst);
        self.halt.cancel();
    }

    fn record_reason(&self, reason: StopReason) {
        self.reason.lock().get_or_insert(reason);
    }

    fn transition(
        &self,
        op: &'static str,
        from: DaemonState,
        to: DaemonState,
    ) -> Result<(), RuntimeError> {
        let moved = self.state.send_if_modified(|s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        });
        if moved { Ok(()) } else { Err(self.invalid(op)) }
    }

    fn invalid(&self, op: &'static str) -> RuntimeError {
        RuntimeError::InvalidState {
            op,
            state: self.state(),
        }
    }
}
