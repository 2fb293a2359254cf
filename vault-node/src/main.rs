//! Vault node - main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vault_node::api::{self, AppState};
use vault_node::auth::StaticTokenProvider;
use vault_node::daemon::shutdown::ShutdownCoordinator;
use vault_node::{database, utils, Config, JobController, JobStore};

/// How long in-flight runs may take to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.node.port = port;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    utils::logger::init(&config.log.level)?;
    api::health::init_start_time();

    tracing::info!("Starting vault-node v{}", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.node.vaults_dir)
        .await
        .with_context(|| format!("cannot create {}", config.node.vaults_dir.display()))?;

    let store = JobStore::open(&config.node.db_path)?;
    let interrupted = store.reset_interrupted()?;
    if interrupted > 0 {
        tracing::warn!(count = interrupted, "Marked jobs interrupted by a previous shutdown as failed");
    }

    let config = Arc::new(config);
    let database = database::from_config(&config.database);
    let controller = JobController::new(store, Arc::clone(&config), database);
    let tokens = Arc::new(StaticTokenProvider::new(config.auth.tokens.clone()));
    let app = api::create_router(AppState::new(controller.clone(), tokens, config.sync.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.node.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let coordinator = ShutdownCoordinator::new();
    let stopped = coordinator.subscribe();
    let server = tokio::spawn(async move { axum::serve(listener, app).with_graceful_shutdown(stopped).await });

    coordinator.wait_for_signal().await;

    match tokio::time::timeout(Duration::from_secs(5), server).await {
        Ok(Ok(Ok(()))) => tracing::info!("HTTP server stopped"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout"),
    }

    coordinator.drain(&controller, SHUTDOWN_GRACE).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
