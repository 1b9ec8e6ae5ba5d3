use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shiva::config::CONFIG_ENV;
use shiva::core::listen_for_signals;
use shiva::{Config, Daemon, DaemonBuilder, LogWriter, Subscribe, WorkError, WorkFn, WorkRef};

#[derive(Parser)]
#[command(name = "shivad", about = "Pluggable-component process supervisor")]
struct Cli {
    /// Configuration file; falls back to $SHIVA_CONFIG, then ./config.toml.
    #[arg(long, short, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prepare and run the daemon until stopped.
    Run,
    /// Prepare connections and report them, then exit.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = Config::resolve_path(cli.config.as_deref());
    let cfg = Config::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    let default_level = cfg.common.log_level.clone().unwrap_or_else(|| "info".into());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!(path = %path.display(), "configuration loaded");

    match cli.command {
        Command::Run => run(cfg).await,
        Command::Check => check(cfg).await,
    }
}

fn subscribers() -> Vec<Arc<dyn Subscribe>> {
    vec![Arc::new(LogWriter::new())]
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let addr = cfg.common.web.addr();
    let daemon = DaemonBuilder::new(cfg).with_subscribers(subscribers()).build();

    if let Err(e) = daemon.prepare().await {
        if let Some(phase) = e.phase() {
            error!(%phase, error = %e, "startup aborted");
        }
        return Err(e).context("daemon preparation failed");
    }

    listen_for_signals(&daemon);
    serve_status(&daemon, &addr).await?;

    let report = daemon
        .spawn_run()
        .await
        .context("daemon run task failed")?
        .context("daemon run task was cancelled")??;

    info!(reason = report.reason.as_label(), "daemon finished");
    if let Some(outcomes) = &report.outcomes {
        for (unit, outcome) in outcomes {
            info!(unit = %unit, outcome = outcome.as_label(), "root work outcome");
        }
    }
    if !report.is_clean() {
        bail!("daemon stopped after a failure ({})", report.reason.as_label());
    }
    Ok(())
}

/// Binds the status listener and spawns it as `Server.serve`.
///
/// Every connection receives one line with the daemon state.
async fn serve_status(daemon: &Arc<Daemon>, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status listener on {addr}"))?;
    info!(%addr, "status listener bound");

    let d = Arc::clone(daemon);
    daemon.spawn_supervised("Server.serve", move |token: CancellationToken| async move {
        loop {
            let (mut sock, peer) = tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "status accept failed");
                        continue;
                    }
                },
            };
            let line = format!("{}\n", d.state());
            if let Err(e) = sock.write_all(line.as_bytes()).await {
                warn!(%peer, error = %e, "status write failed");
            }
        }
    });
    Ok(())
}

async fn check(cfg: Config) -> anyhow::Result<()> {
    let session = DaemonBuilder::new(cfg).with_subscribers(subscribers()).build_cli();
    let outcome = session
        .run(|ctx| {
            let connections = Arc::clone(&ctx.connections);
            let unit: WorkRef = WorkFn::arc("check.connections", move |_ctx: CancellationToken| {
                let connections = Arc::clone(&connections);
                async move {
                    for (name, conn) in connections.iter() {
                        info!(connection = name, driver = conn.driver(), "connection ready");
                    }
                    Ok::<(), WorkError>(())
                }
            });
            unit
        })
        .await
        .context("check failed")?;

    if !outcome.is_clean() {
        bail!("check ended with {}", outcome.as_label());
    }
    Ok(())
}
