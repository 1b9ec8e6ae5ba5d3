//! # Work units and function-backed work.
//!
//! A [`Work`] is one long-running unit produced by a dispatcher's `start()`
//! (a "root work unit"). It has a stable name, which becomes its task identity
//! in the [`TaskRegistry`](crate::TaskRegistry), and a `spawn` method that creates
//! a fresh future receiving a [`CancellationToken`].
//!
//! [`WorkFn`] wraps a closure `F: Fn(CancellationToken) -> Fut`.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use shiva::{WorkError, WorkFn, WorkRef};
//!
//! let w: WorkRef = WorkFn::arc("worker.loop", |ctx: CancellationToken| async move {
//!     ctx.cancelled().await;
//!     Ok::<_, WorkError>(())
//! });
//! assert_eq!(w.name(), "worker.loop");
//! ```

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::WorkError;

/// Boxed future returned by [`Work::spawn`].
pub type BoxWorkFuture = Pin<Box<dyn Future<Output = Result<(), WorkError>> + Send + 'static>>;

/// Shared handle to a work unit.
pub type WorkRef = Arc<dyn Work>;

/// # Asynchronous, cancelable unit of dispatcher work.
pub trait Work: Send + Sync + 'static {
    /// Stable, human-readable name; used as the task identity.
    fn name(&self) -> &str;

    /// Creates the future for this unit.
    ///
    /// Implementations should observe `ctx` at their suspension points and exit promptly.
    fn spawn(&self, ctx: CancellationToken) -> BoxWorkFuture;
}

/// Function-backed work unit.
pub struct WorkFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> WorkFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the unit and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F> fmt::Debug for WorkFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkFn").field("name", &self.name).finish()
    }
}

impl<F, Fut> Work for WorkFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, ctx: CancellationToken) -> BoxWorkFuture {
        Box::pin((self.f)(ctx))
    }
}

/// How a root work unit ended.
///
/// Carried per unit in the run report so a clean exit can be told apart from a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Returned `Ok(())`.
    Completed,
    /// Returned an error (including [`WorkError::Canceled`] from cooperative exits).
    Failed(WorkError),
    /// Panicked; carries the panic message.
    Panicked(String),
    /// Dropped by a cancellation request before finishing.
    Cancelled,
}

impl WorkOutcome {
    /// Builds an outcome from a unit's result; cooperative cancellation counts as `Cancelled`.
    pub fn from_result(res: Result<(), WorkError>) -> Self {
        match res {
            Ok(()) => WorkOutcome::Completed,
            Err(WorkError::Canceled) => WorkOutcome::Cancelled,
            Err(e) => WorkOutcome::Failed(e),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkOutcome::Completed => "completed",
            WorkOutcome::Failed(_) => "failed",
            WorkOutcome::Panicked(_) => "panicked",
            WorkOutcome::Cancelled => "cancelled",
        }
    }

    /// True for `Completed` and `Cancelled`.
    pub fn is_clean(&self) -> bool {
        matches!(self, WorkOutcome::Completed | WorkOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_creates_fresh_future() {
        let w = WorkFn::arc("once", |_ctx: CancellationToken| async {
            Err::<(), _>(WorkError::fail("boom"))
        });
        let first = w.spawn(CancellationToken::new()).await;
        let second = w.spawn(CancellationToken::new()).await;
        assert_eq!(first, second);
    }

    #[test]
    fn outcome_mapping() {
        assert_eq!(WorkOutcome::from_result(Ok(())), WorkOutcome::Completed);
        assert_eq!(
            WorkOutcome::from_result(Err(WorkError::Canceled)),
            WorkOutcome::Cancelled
        );
        let failed = WorkOutcome::from_result(Err(WorkError::fail("x")));
        assert_eq!(failed.as_label(), "failed");
        assert!(!failed.is_clean());
    }
}
