//! # Task registry: explicit ownership of every task the daemon may cancel.
//!
//! Every concurrent unit the daemon knows about is spawned through
//! [`TaskRegistry::spawn`] with an identity string and a [`TaskClass`]. At
//! shutdown the registry is enumerated and each outstanding task is either
//! exempted or sent a cancellation request.
//!
//! ## Architecture
//! ```text
//! spawn(identity, class, make) ──► tokio::spawn(select! { token.cancelled() | make(token) })
//!                                     └─► Entry { id, identity, class, token, abort }
//!
//! cancel_outstanding(allow_list)
//!   ├─► prune finished entries
//!   ├─► skip the task running this call (tokio::task::try_id)
//!   ├─► Infrastructure            ─► exempt ("infrastructure")
//!   ├─► identity ⊇ allow entry    ─► exempt (matching entry)
//!   └─► otherwise                 ─► token.cancel()  (fire-and-forget)
//! ```
//!
//! ## Rules
//! - Cancellation is cooperative: the wrapper drops the unit's future at its next
//!   suspension point; the unit may also observe its token directly.
//! - Cancelling a task that already finished is a no-op.
//! - Finished entries are pruned on every spawn and every pass.
//! - After the first pass the registry is closed: a later spawn gets that pass's
//!   decision on arrival.
//! - The lock is never held across `.await`.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::events::{Bus, Event, EventKind};
use crate::subscribers::panic_message;
use crate::work::unit::{WorkOutcome, WorkRef};

/// Identity substrings that are exempt by default: the hosting server's lifecycle
/// tasks and the supervisor's own root-work waiter.
pub const DEFAULT_ALLOW_LIST: [&str; 4] = [
    "LifespanOn.main",
    "LifespanOn",
    "Server.serve",
    "Shiva.wait_coro",
];

/// Ownership class of a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    /// Host or supervisor plumbing; never cancelled by the shutdown pass.
    Infrastructure,
    /// Supervised work; cancelled unless allow-listed.
    Supervised,
}

/// Fixed set of identity substrings exempt from shutdown cancellation.
#[derive(Debug, Clone)]
pub struct AllowList {
    entries: Vec<Arc<str>>,
}

impl Default for AllowList {
    /// Returns a list holding [`DEFAULT_ALLOW_LIST`].
    fn default() -> Self {
        Self::new(DEFAULT_ALLOW_LIST)
    }
}

impl AllowList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    /// A list that exempts nothing.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends entries; empty strings are ignored since they would match everything.
    pub fn extend<I, S>(&mut self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.entries
            .extend(entries.into_iter().map(Into::<Arc<str>>::into).filter(|e| !e.is_empty()));
    }

    /// Returns the first entry contained in `identity`.
    pub fn matches(&self, identity: &str) -> Option<&str> {
        self.entries
            .iter()
            .map(|e| e.as_ref())
            .find(|e| !e.is_empty() && identity.contains(e))
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.as_ref())
    }
}

/// Result of one cancellation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelPass {
    /// Identities that were sent a cancellation request.
    pub cancelled: Vec<String>,
    /// Identities exempted, with the reason (allow-list entry or "infrastructure").
    pub exempted: Vec<(String, String)>,
}

struct Entry {
    id: tokio::task::Id,
    identity: Arc<str>,
    class: TaskClass,
    cancel: CancellationToken,
    abort: AbortHandle,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    /// Set by the first pass; holds the allow-list it used (`None` for `cancel_all`).
    closed: Option<Option<AllowList>>,
}

/// Registry of tasks spawned on behalf of the daemon and its host.
pub struct TaskRegistry {
    inner: Mutex<Inner>,
    bus: Bus,
}

impl TaskRegistry {
    pub fn new(bus: Bus) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bus,
        }
    }

    /// Spawns a task under `identity`.
    ///
    /// `make` receives the task's cancellation token. The handle resolves to
    /// `None` when the task was dropped by a cancellation request. Once a pass
    /// has run, a task it would have cancelled is cancelled on arrival.
    pub fn spawn<F, Fut>(
        &self,
        identity: impl Into<Arc<str>>,
        class: TaskClass,
        make: F,
    ) -> JoinHandle<Option<Fut::Output>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let token = CancellationToken::new();
        let fut = make(token.clone());
        let guard = token.clone();
        let join = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = guard.cancelled() => None,
                out = fut => Some(out),
            }
        });

        let entry = Entry {
            id: join.id(),
            identity: identity.into(),
            class,
            cancel: token,
            abort: join.abort_handle(),
        };

        let mut inner = self.inner.lock();
        inner.entries.retain(|e| !e.abort.is_finished());
        let late = inner
            .closed
            .as_ref()
            .is_some_and(|allow| exemption(entry.class, &entry.identity, allow.as_ref()).is_none());
        if late {
            info!(task = %entry.identity, "cancelling task spawned after shutdown");
            entry.cancel.cancel();
            self.bus.publish(
                Event::new(EventKind::TaskCancelled)
                    .with_subject(Arc::clone(&entry.identity))
                    .with_reason("late"),
            );
        } else {
            inner.entries.push(entry);
        }
        join
    }

    /// Spawns a root work unit as supervised work.
    pub fn spawn_work(&self, unit: &WorkRef) -> RootHandle {
        let work = Arc::clone(unit);
        let join = self.spawn(unit.name().to_string(), TaskClass::Supervised, move |ctx| {
            work.spawn(ctx)
        });
        RootHandle {
            name: unit.name().to_string(),
            join,
        }
    }

    /// Identities and classes of tasks that have not finished yet.
    pub fn outstanding(&self) -> Vec<(String, TaskClass)> {
        let mut inner = self.inner.lock();
        inner.entries.retain(|e| !e.abort.is_finished());
        inner
            .entries
            .iter()
            .map(|e| (e.identity.to_string(), e.class))
            .collect()
    }

    /// Issues cancellation requests to every outstanding task except the caller,
    /// infrastructure tasks and allow-listed identities.
    pub fn cancel_outstanding(&self, allow: &AllowList) -> CancelPass {
        self.pass(Some(allow))
    }

    /// Issues cancellation requests to every outstanding task except the caller.
    pub fn cancel_all(&self) -> CancelPass {
        self.pass(None)
    }

    fn pass(&self, allow: Option<&AllowList>) -> CancelPass {
        let current = tokio::task::try_id();
        let mut inner = self.inner.lock();
        inner.entries.retain(|e| !e.abort.is_finished());
        if inner.closed.is_none() {
            inner.closed = Some(allow.cloned());
        }

        let mut pass = CancelPass::default();
        for e in inner.entries.iter() {
            if Some(e.id) == current {
                continue;
            }
            match exemption(e.class, &e.identity, allow) {
                Some(matched) => {
                    info!(task = %e.identity, matched, "passing task");
                    self.bus.publish(
                        Event::new(EventKind::TaskExempted)
                            .with_subject(Arc::clone(&e.identity))
                            .with_reason(matched),
                    );
                    pass.exempted.push((e.identity.to_string(), matched.to_string()));
                }
                None => {
                    info!(task = %e.identity, "cancelling task");
                    e.cancel.cancel();
                    self.bus.publish(
                        Event::new(EventKind::TaskCancelled).with_subject(Arc::clone(&e.identity)),
                    );
                    pass.cancelled.push(e.identity.to_string());
                }
            }
        }
        pass
    }
}

/// Why a task is spared by a pass, if it is.
fn exemption<'a>(class: TaskClass, identity: &str, allow: Option<&'a AllowList>) -> Option<&'a str> {
    allow.and_then(|allow| match class {
        TaskClass::Infrastructure => Some("infrastructure"),
        TaskClass::Supervised => allow.matches(identity),
    })
}

/// Handle to a spawned root work unit.
pub struct RootHandle {
    name: String,
    join: JoinHandle<Option<Result<(), crate::error::WorkError>>>,
}

impl RootHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the unit and classifies how it ended.
    pub async fn join(self) -> (String, WorkOutcome) {
        let outcome = match self.join.await {
            Ok(Some(res)) => WorkOutcome::from_result(res),
            Ok(None) => WorkOutcome::Cancelled,
            Err(je) => outcome_of_join_error(je),
        };
        (self.name, outcome)
    }
}

fn outcome_of_join_error(je: JoinError) -> WorkOutcome {
    if je.is_panic() {
        WorkOutcome::Panicked(panic_message(&*je.into_panic()))
    } else {
        WorkOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkError;
    use crate::work::unit::WorkFn;
    use std::time::Duration;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(Bus::new(64))
    }

    #[test]
    fn allow_list_matches_substrings() {
        let allow = AllowList::default();
        assert_eq!(allow.matches("LifespanOn.main"), Some("LifespanOn.main"));
        assert_eq!(allow.matches("uvicorn.LifespanOn.startup"), Some("LifespanOn"));
        assert_eq!(allow.matches("worker.loop"), None);

        let mut extra = AllowList::empty();
        extra.extend(["", "Host"]);
        assert_eq!(extra.entries().count(), 1);
        assert_eq!(extra.matches("anything"), None);
    }

    #[tokio::test]
    async fn allow_listed_task_is_exempt_others_cancelled() {
        let reg = registry();
        let host = reg.spawn("LifespanOn.main", TaskClass::Supervised, |_| {
            std::future::pending::<()>()
        });
        let worker = reg.spawn("worker.loop", TaskClass::Supervised, |_| {
            std::future::pending::<()>()
        });
        let infra = reg.spawn("status", TaskClass::Infrastructure, |_| {
            std::future::pending::<()>()
        });

        let pass = reg.cancel_outstanding(&AllowList::default());
        assert_eq!(pass.cancelled, vec!["worker.loop".to_string()]);
        assert_eq!(
            pass.exempted,
            vec![
                ("LifespanOn.main".to_string(), "LifespanOn.main".to_string()),
                ("status".to_string(), "infrastructure".to_string()),
            ]
        );

        assert_eq!(worker.await.unwrap(), None);
        assert!(!host.is_finished());
        assert!(!infra.is_finished());
        host.abort();
        infra.abort();
    }

    #[tokio::test]
    async fn finished_tasks_are_pruned_and_not_cancelled() {
        let reg = registry();
        let done = reg.spawn("quick", TaskClass::Supervised, |_| async { 7 });
        assert_eq!(done.await.unwrap(), Some(7));

        let pass = reg.cancel_outstanding(&AllowList::empty());
        assert!(pass.cancelled.is_empty());
        assert!(reg.outstanding().is_empty());
    }

    #[tokio::test]
    async fn spawn_prunes_finished_entries() {
        let reg = registry();
        for i in 0..8 {
            let h = reg.spawn(format!("burst.{i}"), TaskClass::Supervised, |_| async {});
            h.await.unwrap();
        }
        let _last = reg.spawn("last", TaskClass::Supervised, |_| async {});
        assert_eq!(reg.inner.lock().entries.len(), 1);
    }

    #[tokio::test]
    async fn spawns_after_a_pass_get_the_same_decision() {
        let reg = registry();
        let pass = reg.cancel_outstanding(&AllowList::default());
        assert!(pass.cancelled.is_empty());

        let late = reg.spawn("worker.late", TaskClass::Supervised, |_| {
            std::future::pending::<()>()
        });
        let host = reg.spawn("Server.serve", TaskClass::Supervised, |_| {
            std::future::pending::<()>()
        });
        let infra = reg.spawn("status", TaskClass::Infrastructure, |_| {
            std::future::pending::<()>()
        });

        assert_eq!(late.await.unwrap(), None);
        let ids: Vec<_> = reg.outstanding().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["Server.serve".to_string(), "status".to_string()]);
        host.abort();
        infra.abort();
    }

    #[tokio::test]
    async fn late_root_work_is_reported_cancelled() {
        let reg = registry();
        reg.cancel_all();
        let slow: WorkRef = WorkFn::arc("slow", |_ctx: CancellationToken| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), WorkError>(())
        });
        assert_eq!(reg.spawn_work(&slow).join().await, ("slow".to_string(), WorkOutcome::Cancelled));
    }

    #[tokio::test]
    async fn caller_is_never_cancelled() {
        let reg = Arc::new(registry());
        let inner = Arc::clone(&reg);
        let me = reg.spawn("shutdown", TaskClass::Supervised, move |_| async move {
            inner.cancel_all()
        });
        let pass = me.await.unwrap().unwrap();
        assert!(pass.cancelled.is_empty());
    }

    #[tokio::test]
    async fn root_handle_reports_outcomes() {
        let reg = registry();
        let ok: WorkRef = WorkFn::arc("ok", |_ctx: CancellationToken| async {
            Ok::<(), WorkError>(())
        });
        let bad: WorkRef = WorkFn::arc("bad", |_ctx: CancellationToken| async {
            Err::<(), _>(WorkError::fail("nope"))
        });
        let crash: WorkRef = WorkFn::arc("crash", |_ctx: CancellationToken| async {
            if true {
                panic!("kaboom");
            }
            Ok::<(), WorkError>(())
        });
        let slow: WorkRef = WorkFn::arc("slow", |_ctx: CancellationToken| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), WorkError>(())
        });

        let finished = futures::future::join_all(
            [&ok, &bad, &crash].into_iter().map(|u| reg.spawn_work(u).join()),
        )
        .await;
        assert_eq!(finished[0], ("ok".to_string(), WorkOutcome::Completed));
        assert_eq!(
            finished[1],
            ("bad".to_string(), WorkOutcome::Failed(WorkError::fail("nope")))
        );
        assert_eq!(
            finished[2],
            ("crash".to_string(), WorkOutcome::Panicked("kaboom".to_string()))
        );

        let pending = reg.spawn_work(&slow);
        assert_eq!(pending.name(), "slow");
        let pass = reg.cancel_all();
        assert_eq!(pass.cancelled, vec!["slow".to_string()]);
        assert_eq!(pending.join().await, ("slow".to_string(), WorkOutcome::Cancelled));
    }
}
