//! # Daemon lifecycle state and reports.
//!
//! ```text
//! Created ──prepare()──► Preparing ──run()──► Running ──stop_async()──► Stopping ──► Stopped
//!                            │                                                        ▲
//!                            └──────────── preparation failed ────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use crate::dispatchers::DispatcherStop;
use crate::error::WorkError;
use crate::work::{CancelPass, WorkOutcome};

/// Lifecycle state of a [`Daemon`](crate::Daemon).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Created,
    /// `prepare()` was called; stays here after a successful preparation until `run()`.
    Preparing,
    Running,
    Stopping,
    /// Terminal.
    Stopped,
}

impl DaemonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Created => "created",
            DaemonState::Preparing => "preparing",
            DaemonState::Running => "running",
            DaemonState::Stopping => "stopping",
            DaemonState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the run loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` or `stop_async()` was called (signal, host, test).
    Requested,
    /// Every root work unit finished on its own.
    RootWorkCompleted,
    /// A dispatcher's `start()` failed, so no root work ran.
    StartFailed(WorkError),
}

impl StopReason {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StopReason::Requested => "requested",
            StopReason::RootWorkCompleted => "root_work_completed",
            StopReason::StartFailed(_) => "start_failed",
        }
    }
}

/// What the shutdown protocol did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Dispatcher instances in the order they were stopped.
    pub dispatchers: Vec<DispatcherStop>,
    /// Cancellation decisions for outstanding tasks.
    pub tasks: CancelPass,
}

/// Summary returned by [`Daemon::run`](crate::Daemon::run).
#[derive(Debug, Clone)]
pub struct RunReport {
    pub reason: StopReason,
    /// Per-unit outcomes, if the root-work join had finished when the run ended.
    pub outcomes: Option<Vec<(String, WorkOutcome)>>,
    pub shutdown: Arc<ShutdownReport>,
}

impl RunReport {
    /// True if every joined unit ended cleanly and nothing failed to start.
    pub fn is_clean(&self) -> bool {
        !matches!(self.reason, StopReason::StartFailed(_))
            && self
                .outcomes
                .as_ref()
                .is_none_or(|all| all.iter().all(|(_, o)| o.is_clean()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_cleanliness() {
        let mut report = RunReport {
            reason: StopReason::RootWorkCompleted,
            outcomes: Some(vec![("a".into(), WorkOutcome::Completed)]),
            shutdown: Arc::default(),
        };
        assert!(report.is_clean());

        report.outcomes = Some(vec![("a".into(), WorkOutcome::Panicked("x".into()))]);
        assert!(!report.is_clean());

        report.outcomes = None;
        report.reason = StopReason::StartFailed(WorkError::fail("bind"));
        assert!(!report.is_clean());
        assert_eq!(DaemonState::Stopping.to_string(), "stopping");
    }
}
