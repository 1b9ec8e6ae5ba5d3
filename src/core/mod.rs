//! Runtime core: daemon lifecycle, construction and signal wiring.
//!
//! - [`daemon`]: preparation, run loop, shutdown protocol;
//! - [`builder`]: wires pluggable parts to a shared bus and task registry;
//! - [`state`]: lifecycle state and run/shutdown reports;
//! - [`shutdown`]: OS signals to `Daemon::stop`;
//! - [`cli`]: one-shot command sessions.

mod builder;
mod cli;
mod daemon;
mod shutdown;
mod state;

pub use builder::{DaemonBuilder, EVENTS_IDENTITY};
pub use cli::{CliSession, CommandContext};
pub use daemon::{Daemon, RUN_IDENTITY, WAIT_CORO_IDENTITY};
pub use shutdown::{SIGNALS_IDENTITY, listen as listen_for_signals, wait_for_shutdown_signal};
pub use state::{DaemonState, RunReport, ShutdownReport, StopReason};
