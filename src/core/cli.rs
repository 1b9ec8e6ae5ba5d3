//! # One-shot command sessions.
//!
//! A [`CliSession`] is the short-lived sibling of the [`Daemon`](crate::Daemon):
//! it loads the CLI scope set, prepares connections only, runs a single command
//! unit to completion and then cancels every task it registered.
//!
//! ```text
//! run(command):
//!   load_scopes(CLI_SCOPES)  ─► ConnectionSupervisor::prepare
//!   spawn command (supervised) ─► join
//!   cancel_all()             (no allow-list)
//! ```

use std::sync::Arc;

use tracing::{error, info};

use crate::config::Config;
use crate::connections::{ConnectionRegistry, ConnectionSupervisor};
use crate::error::{PreparePhase, RuntimeError};
use crate::events::Bus;
use crate::scopes::{CLI_SCOPES, ScopeChainBuilder, ScopeRegistry, ScopeResolver, load_scopes};
use crate::subscribers::SubscriberSet;
use crate::work::{TaskRegistry, WorkOutcome, WorkRef};

/// What a command can use.
#[derive(Clone)]
pub struct CommandContext {
    pub connections: Arc<ConnectionRegistry>,
    pub scopes: Arc<ScopeRegistry>,
}

/// Prepared-on-demand environment for a single command.
pub struct CliSession {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) subs: Arc<SubscriberSet>,
    pub(crate) tasks: Arc<TaskRegistry>,
    pub(crate) chains: ScopeChainBuilder,
    pub(crate) resolver: Arc<dyn ScopeResolver>,
    pub(crate) connection_sup: ConnectionSupervisor,
}

impl CliSession {
    /// Loads the CLI scopes and prepares the declared connections.
    pub async fn prepare(&self) -> Result<CommandContext, RuntimeError> {
        let scopes = load_scopes(
            &self.chains,
            self.resolver.as_ref(),
            CLI_SCOPES,
            self.cfg.scopes.packages.as_slice(),
            &self.bus,
        )
        .map_err(|source| RuntimeError::Prepare {
            phase: PreparePhase::Scopes,
            source,
        })?;

        let connections = self
            .connection_sup
            .prepare(&self.cfg.connections)
            .await
            .map_err(|source| RuntimeError::Prepare {
                phase: PreparePhase::Connections,
                source,
            })?;

        Ok(CommandContext {
            connections: Arc::new(connections),
            scopes: Arc::new(scopes),
        })
    }

    /// Prepares, runs the unit built by `command`, then cancels everything still registered.
    pub async fn run<F>(&self, command: F) -> Result<WorkOutcome, RuntimeError>
    where
        F: FnOnce(&CommandContext) -> WorkRef,
    {
        let ctx = self.prepare().await?;
        let unit = command(&ctx);
        info!(command = unit.name(), "running command");

        let (name, outcome) = self.tasks.spawn_work(&unit).join().await;
        match &outcome {
            WorkOutcome::Failed(e) => error!(command = %name, error = %e, "command failed"),
            WorkOutcome::Panicked(msg) => error!(command = %name, panic = %msg, "command panicked"),
            _ => info!(command = %name, outcome = outcome.as_label(), "command finished"),
        }

        let pass = self.tasks.cancel_all();
        info!(cancelled = pass.cancelled.len(), "cli session closed");
        Ok(outcome)
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Number of registered event subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DaemonBuilder;
    use crate::config::ConnectionDecl;
    use crate::connections::{MEMORY_DRIVER, MemoryConnection};
    use crate::error::WorkError;
    use crate::work::{TaskClass, WorkFn};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn command_sees_connections_and_leftovers_are_cancelled() {
        let mut cfg = Config::default();
        cfg.connections = vec![ConnectionDecl::new("cache", MEMORY_DRIVER)];
        let session = DaemonBuilder::new(cfg).build_cli();

        let tasks = Arc::clone(session.tasks());
        let leftover = tasks.spawn("background.poller", TaskClass::Supervised, |_| {
            std::future::pending::<()>()
        });

        let outcome = session
            .run(|ctx| {
                assert!(ctx.scopes.get("commands").is_some());
                let conns = Arc::clone(&ctx.connections);
                let unit: WorkRef = WorkFn::arc("cmd.fill", move |_ctx: CancellationToken| {
                    let conns = Arc::clone(&conns);
                    async move {
                        let store = conns
                            .get_as::<MemoryConnection>("cache")
                            .ok_or_else(|| WorkError::fail("no cache"))?;
                        store.set("k", "v");
                        Ok::<(), WorkError>(())
                    }
                });
                unit
            })
            .await
            .unwrap();

        assert_eq!(outcome, WorkOutcome::Completed);
        assert_eq!(leftover.await.unwrap(), None);
    }

    #[tokio::test]
    async fn connection_failure_names_the_phase() {
        let mut cfg = Config::default();
        cfg.connections = vec![ConnectionDecl::new("db", "postgres")];
        let session = DaemonBuilder::new(cfg).build_cli();
        let err = session.prepare().await.err().unwrap();
        assert_eq!(err.phase(), Some(PreparePhase::Connections));
    }
}
