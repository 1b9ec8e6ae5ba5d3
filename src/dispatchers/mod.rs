//! # Dispatchers: long-running components that produce root work.
//!
//! - [`Dispatcher`] / [`DispatcherFactory`] / [`DispatcherSet`]: the instance contract
//! - [`DispatcherSupervisor`]: preparation, start and sequential stop
//! - [`DispatcherRegistry`]: instances by type then name
//! - [`TimerDispatcher`]: built-in periodic ticker

mod dispatcher;
mod supervisor;
mod timer;

pub use dispatcher::{Dispatcher, DispatcherContext, DispatcherFactory, DispatcherRef, DispatcherSet};
pub use supervisor::{DispatcherRegistry, DispatcherStop, DispatcherSupervisor};
pub use timer::{TIMER_DISPATCHER, TimerDispatcher, TimerFactory};
