//! mendd — the MendGrid daemon.
//!
//! Single binary that assembles the remediation controller:
//! - Object store (redb)
//! - Reconciler with store-backed upgrade, legacy-check, and remediation adapters
//! - Controller work loop (watch events, resync, deadline re-checks)
//! - REST API + admission review
//!
//! # Usage
//!
//! ```text
//! mendd run --config /etc/mendgrid/mendd.toml --port 8480 --data-dir /var/lib/mendgrid
//! mendd config --config /etc/mendgrid/mendd.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mendgrid_controller::{
    Controller, ControllerSettings, Reconciler, ReconcilerSettings, StoreLegacyCheckDetector,
    StoreRemediationClient, StoreUpgradeChecker,
};
use mendgrid_core::MendConfig;
use mendgrid_health::SystemClock;
use mendgrid_state::StateStore;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,mendd=debug,mendgrid=debug";

#[derive(Parser)]
#[command(name = "mendd", about = "MendGrid node-health remediation daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and the API server.
    Run {
        /// Path to mendd.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `[api] port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `[store] data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        json_logs: bool,
    },

    /// Print the effective configuration and exit.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            json_logs,
        } => {
            init_tracing(json_logs);
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.api.get_or_insert_with(Default::default).port = Some(port);
            }
            if let Some(data_dir) = data_dir {
                config.store.get_or_insert_with(Default::default).data_dir = Some(data_dir);
            }
            run(config).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MendConfig> {
    match path {
        Some(path) => MendConfig::from_file(path),
        None => Ok(MendConfig::default()),
    }
}

async fn run(config: MendConfig) -> anyhow::Result<()> {
    info!("MendGrid daemon starting");

    // Ensure data directory exists.
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("mendgrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(SystemClock),
        Arc::new(StoreUpgradeChecker::new(store.clone())),
        Arc::new(StoreLegacyCheckDetector::new(store.clone())),
        Arc::new(StoreRemediationClient::new(store.clone())),
        ReconcilerSettings {
            status_retries: config.status_retries(),
            remediation_namespace: config.remediation_namespace(),
        },
    );
    let controller = Controller::new(
        Arc::new(reconciler),
        ControllerSettings {
            resync_interval: config.resync_interval(),
            error_backoff: config.error_backoff(),
        },
    );
    info!(
        resync = ?config.resync_interval(),
        backoff = ?config.error_backoff(),
        "controller initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let controller_handle = tokio::spawn(async move {
        controller.run(shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = mendgrid_api::build_router(store);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port()));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for the controller to drain.
    let _ = controller_handle.await;

    info!("MendGrid daemon stopped");
    Ok(())
}
