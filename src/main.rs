use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use rpc_monitor::config::Config;
use rpc_monitor::monitor::MonitorService;
use rpc_monitor::{server, AppState};

/// RPC call statistics collector: ingests per-call counters, keeps
/// per-minute history on disk and renders per-method charts.
#[derive(Parser)]
#[command(name = "rpc-monitor", version, about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity (trace, debug, info, warn, error). Overrides the file.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    let level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;
    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting rpc-monitor");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let monitor =
        Arc::new(MonitorService::from_config(&cfg).context("starting statistics monitor")?);

    let state = Arc::new(AppState {
        monitor: Arc::clone(&monitor),
    });
    let app = server::create_router(state, &cfg.charts_dir);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;

    tracing::info!(
        addr = %cfg.listen_addr,
        charts_dir = %cfg.charts_dir.display(),
        "listening",
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    monitor.close();
    monitor.stopped().await;

    tracing::info!("rpc-monitor stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
