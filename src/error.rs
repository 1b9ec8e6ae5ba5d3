//! Error types used by the supervisor, its subsystems and the work it runs.
//!
//! - [`ConfigError`]: the configuration document could not be read, parsed or validated.
//! - [`PrepareError`]: a scope, connection or dispatcher could not be prepared.
//! - [`RuntimeError`]: errors raised by the [`Daemon`](crate::Daemon) itself.
//! - [`WorkError`]: errors raised by dispatcher work units and lifecycle calls.
//!
//! All of them provide `as_label` (stable snake_case label for logs).

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// # Errors produced while loading the configuration document.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the document model.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Path that was parsed (`<inline>` for in-memory documents).
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// The document parsed but declares something malformed.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse { .. } => "config_parse",
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }
}

/// # Errors produced while preparing scopes, connections or dispatchers.
///
/// The first four variants are configuration problems detected before any
/// driver or factory runs; [`PrepareError::Failed`] wraps a component's own failure.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PrepareError {
    /// A declaration is malformed (e.g. empty name).
    #[error("invalid declaration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },

    /// Two declarations share the same identity.
    #[error("duplicate {what} `{name}`")]
    Duplicate {
        /// Kind of declaration ("connection", "dispatcher").
        what: &'static str,
        /// Offending name.
        name: String,
    },

    /// A connection names a driver nobody registered.
    #[error("unknown driver `{driver}` for connection `{connection}`")]
    UnknownDriver {
        /// Connection name.
        connection: String,
        /// Driver kind requested.
        driver: String,
    },

    /// A dispatcher declaration names a type nobody registered.
    #[error("unknown dispatcher type `{kind}` for instance `{instance}`")]
    UnknownDispatcher {
        /// Dispatcher type requested.
        kind: String,
        /// Instance name.
        instance: String,
    },

    /// The component itself failed to prepare.
    #[error("`{component}` failed: {error}")]
    Failed {
        /// Component identity (connection name, `type.instance`, scope).
        component: String,
        /// Failure message.
        error: String,
    },
}

impl PrepareError {
    /// Convenience constructor for [`PrepareError::Failed`].
    pub fn failed(component: impl Into<String>, error: impl fmt::Display) -> Self {
        PrepareError::Failed {
            component: component.into(),
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            PrepareError::Invalid { .. } => "prepare_invalid",
            PrepareError::Duplicate { .. } => "prepare_duplicate",
            PrepareError::UnknownDriver { .. } => "prepare_unknown_driver",
            PrepareError::UnknownDispatcher { .. } => "prepare_unknown_dispatcher",
            PrepareError::Failed { .. } => "prepare_failed",
        }
    }

    /// True for errors caused by the declarations rather than by a component.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, PrepareError::Failed { .. })
    }
}

/// Preparation phase that failed; used to produce a clear startup diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparePhase {
    /// Scope chain construction and resolution.
    Scopes,
    /// Connection driver preparation.
    Connections,
    /// Dispatcher preparation.
    Dispatchers,
}

impl fmt::Display for PreparePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PreparePhase::Scopes => "scopes",
            PreparePhase::Connections => "connections",
            PreparePhase::Dispatchers => "dispatchers",
        })
    }
}

/// # Errors produced by the daemon.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A preparation phase failed; the daemon never reaches `Running`.
    #[error("failed to prepare {phase}: {source}")]
    Prepare {
        /// Phase that failed.
        phase: PreparePhase,
        /// Underlying cause.
        #[source]
        source: PrepareError,
    },

    /// An operation was invoked in a lifecycle state that does not allow it.
    #[error("cannot {op} while daemon is {state}")]
    InvalidState {
        /// Operation attempted.
        op: &'static str,
        /// Current state.
        state: crate::DaemonState,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use shiva::{PrepareError, PreparePhase, RuntimeError};
    ///
    /// let err = RuntimeError::Prepare {
    ///     phase: PreparePhase::Connections,
    ///     source: PrepareError::failed("db", "refused"),
    /// };
    /// assert_eq!(err.as_label(), "runtime_prepare_failed");
    /// assert_eq!(err.to_string(), "failed to prepare connections: `db` failed: refused");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Prepare { .. } => "runtime_prepare_failed",
            RuntimeError::InvalidState { .. } => "runtime_invalid_state",
            RuntimeError::Config(_) => "runtime_config",
        }
    }

    /// Returns the failed phase, if this is a preparation error.
    pub fn phase(&self) -> Option<PreparePhase> {
        match self {
            RuntimeError::Prepare { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// # Errors produced by work units and dispatcher lifecycle calls.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    /// Non-recoverable error.
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Execution failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Work observed cancellation and exited.
    #[error("context cancelled")]
    Canceled,
}

impl WorkError {
    /// Convenience constructor for [`WorkError::Fail`].
    pub fn fail(error: impl fmt::Display) -> Self {
        WorkError::Fail {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use shiva::WorkError;
    ///
    /// assert_eq!(WorkError::fail("boom").as_label(), "work_failed");
    /// assert_eq!(WorkError::Canceled.as_label(), "work_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkError::Fatal { .. } => "work_fatal",
            WorkError::Fail { .. } => "work_failed",
            WorkError::Canceled => "work_canceled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_error_classification() {
        let dup = PrepareError::Duplicate {
            what: "connection",
            name: "db".into(),
        };
        assert!(dup.is_configuration());
        assert_eq!(dup.to_string(), "duplicate connection `db`");

        let failed = PrepareError::failed("db", "refused");
        assert!(!failed.is_configuration());
        assert_eq!(failed.as_label(), "prepare_failed");
    }

    #[test]
    fn runtime_error_names_the_phase() {
        let err = RuntimeError::Prepare {
            phase: PreparePhase::Dispatchers,
            source: PrepareError::UnknownDispatcher {
                kind: "cron".into(),
                instance: "nightly".into(),
            },
        };
        assert_eq!(err.phase(), Some(PreparePhase::Dispatchers));
        assert!(err.to_string().starts_with("failed to prepare dispatchers:"));
    }
}
