//! # Lifecycle event subscribers.
//!
//! ```text
//! Daemon / subsystems ── publish(Event) ──► Bus ──► subscriber listener ──► SubscriberSet
//!                                                                         ┌─────┴─────┐
//!                                                                         ▼           ▼
//!                                                                     LogWriter    custom
//! ```

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
