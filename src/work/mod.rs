//! # Work units and the task registry.
//!
//! - [`Work`] / [`WorkFn`] / [`WorkRef`]: root work units produced by dispatchers
//! - [`WorkOutcome`]: how a unit ended (completed, failed, panicked, cancelled)
//! - [`TaskRegistry`]: every task the daemon may cancel, with explicit [`TaskClass`]
//! - [`AllowList`]: identity substrings exempt from shutdown cancellation

mod registry;
mod unit;

pub use registry::{AllowList, CancelPass, DEFAULT_ALLOW_LIST, RootHandle, TaskClass, TaskRegistry};
pub use unit::{BoxWorkFuture, Work, WorkFn, WorkOutcome, WorkRef};
