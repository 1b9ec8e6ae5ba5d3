//! # Lifecycle events emitted by the daemon and its subsystems.
//!
//! The [`EventKind`] enum classifies events across four groups:
//! - **Preparation**: package probing, scope resolution, connection and dispatcher setup
//! - **Run**: run start, root work start/finish, stop requests
//! - **Shutdown**: dispatcher stop, per-task cancel/exempt decisions, completion
//! - **Subscriber**: fan-out health (overflow, panic)
//!
//! The [`Event`] struct carries metadata such as timestamp, subject and reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use shiva::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskCancelled)
//!     .with_subject("worker.loop")
//!     .with_reason("not allow-listed");
//!
//! assert_eq!(ev.kind, EventKind::TaskCancelled);
//! assert_eq!(ev.subject.as_deref(), Some("worker.loop"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `subject` (subscriber name) and `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `subject` (subscriber name) and `reason` ("full" / "closed").
    SubscriberOverflow,

    // === Preparation events ===
    /// Declared extension package is importable.
    ///
    /// Sets `subject` (package name).
    PackageFound,

    /// Declared extension package could not be resolved and was skipped.
    ///
    /// Sets `subject` (package name) and `reason`.
    PackageMissing,

    /// A scope's candidate chain was resolved.
    ///
    /// Sets `subject` (scope name) and `count` (sources that contributed).
    ScopeResolved,

    /// A connection was prepared and registered.
    ///
    /// Sets `subject` (connection name) and `reason` (driver kind).
    ConnectionPrepared,

    /// A dispatcher instance was prepared and registered.
    ///
    /// Sets `subject` (`type.instance`).
    DispatcherPrepared,

    // === Run events ===
    /// `run()` entered the `Running` state.
    RunStarted,

    /// A root work unit was scheduled.
    ///
    /// Sets `subject` (unit name).
    RootWorkStarted,

    /// A root work unit finished.
    ///
    /// Sets `subject` (unit name) and `reason` (outcome label).
    RootWorkFinished,

    /// Every root work unit finished; the daemon will shut down.
    ///
    /// Sets `count` (number of units joined).
    RootWorkJoined,

    /// `stop()` was called.
    StopRequested,

    // === Shutdown events ===
    /// The shutdown protocol started.
    ShutdownStarted,

    /// About to call `stop()` on a dispatcher instance.
    ///
    /// Sets `subject` (`type.instance`).
    DispatcherStopping,

    /// A dispatcher instance returned from `stop()`.
    ///
    /// Sets `subject` (`type.instance`) and `reason` on failure.
    DispatcherStopped,

    /// A task was sent a cancellation request.
    ///
    /// Sets `subject` (task identity).
    TaskCancelled,

    /// A task was exempted from cancellation.
    ///
    /// Sets `subject` (task identity) and `reason` (matching allow-list entry or "infrastructure").
    TaskExempted,

    /// Shutdown protocol finished issuing requests.
    ///
    /// Sets `count` (tasks cancelled).
    ShutdownCompleted,
}

/// Lifecycle event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// What the event is about (package, scope, connection, instance, task).
    pub subject: Option<Arc<str>>,
    /// Human-readable reason or detail.
    pub reason: Option<Arc<str>>,
    /// Numeric detail (loaded sources, joined units, cancelled tasks).
    pub count: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            subject: None,
            reason: None,
            count: None,
        }
    }

    /// Attaches a subject.
    #[inline]
    pub fn with_subject(mut self, subject: impl Into<Arc<str>>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a count, saturating at `u32::MAX`.
    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(u32::try_from(n).unwrap_or(u32::MAX));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_subject(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_subject(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}
