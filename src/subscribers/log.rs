//! # LogWriter: renders lifecycle events through `tracing`.
//!
//! Preparation and run events are logged at `info`, shutdown decisions at
//! `warn`/`info`, subscriber health problems at `error`.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default, Debug)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let subject = e.subject.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::PackageFound | EventKind::PackageMissing => {
                debug!(seq = e.seq, kind = ?e.kind, package = subject, reason);
            }
            EventKind::ScopeResolved => {
                debug!(seq = e.seq, scope = subject, loaded = ?e.count, "scope resolved");
            }
            EventKind::ConnectionPrepared => {
                info!(seq = e.seq, connection = subject, driver = reason, "connection prepared");
            }
            EventKind::DispatcherPrepared => {
                info!(seq = e.seq, dispatcher = subject, "dispatcher prepared");
            }
            EventKind::RunStarted => info!(seq = e.seq, "run started"),
            EventKind::RootWorkStarted => {
                debug!(seq = e.seq, unit = subject, "root work scheduled");
            }
            EventKind::RootWorkFinished => {
                info!(seq = e.seq, unit = subject, outcome = reason, "root work finished");
            }
            EventKind::RootWorkJoined => {
                warn!(seq = e.seq, units = ?e.count, "all root work finished");
            }
            EventKind::StopRequested => warn!(seq = e.seq, "stop requested"),
            EventKind::ShutdownStarted => info!(seq = e.seq, "shutdown started"),
            EventKind::DispatcherStopping => {
                warn!(seq = e.seq, dispatcher = subject, "stopping");
            }
            EventKind::DispatcherStopped => {
                info!(seq = e.seq, dispatcher = subject, error = reason, "stopped");
            }
            EventKind::TaskCancelled => info!(seq = e.seq, task = subject, "cancelling task"),
            EventKind::TaskExempted => {
                info!(seq = e.seq, task = subject, matched = reason, "passing task");
            }
            EventKind::ShutdownCompleted => {
                info!(seq = e.seq, cancelled = ?e.count, "shutdown completed");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                error!(seq = e.seq, kind = ?e.kind, subscriber = subject, reason);
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
