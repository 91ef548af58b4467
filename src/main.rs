//! Pushbridge daemon entry point.
//!
//! Loads configuration, registers the enabled translators, starts the
//! HTTP server and supervises the background tasks (VAPID token refresh,
//! SIGHUP configuration reload, graceful shutdown).

// Rust guideline compliant 2026-02

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use pushbridge::{config, server, translator, vapid, AppState, ClientPool, ConfigHandle, Dispatcher};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "pushbridge", version, about)]
struct Cli {
    /// Path of the configuration file.
    #[arg(short, long, default_value = "pushbridge.toml")]
    config: PathBuf,

    /// Override the listen address from the configuration.
    #[arg(short, long)]
    listen: Option<String>,

    /// Log all requests and error causes.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut initial = config::load(&cli.config)?;
    if let Some(listen) = &cli.listen {
        initial.listen_addr = listen.clone();
    }
    initial.verbose |= cli.verbose;

    let registry = translator::build_registry(&initial)?;
    if registry.routes.is_empty() {
        log::warn!("[Server] no translators enabled, serving only /health");
    }

    let pool = ClientPool::new(&initial.gateway.allowed_ips)?;
    let listen_addr = initial.listen_addr.clone();
    let state = Arc::new(AppState {
        config: ConfigHandle::new(initial),
        routes: registry.routes,
        dispatcher: Dispatcher::new(pool),
    });

    let shutdown = CancellationToken::new();

    if let Some(minter) = registry.vapid {
        tokio::spawn(vapid::refresh_loop(minter, shutdown.clone()));
    }

    spawn_reload_task(Arc::clone(&state), cli.config.clone(), cli.verbose);
    spawn_shutdown_task(shutdown.clone());

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("unable to listen on {listen_addr}"))?;
    log::info!("[Server] ready to handle requests at {listen_addr}");

    server::serve(listener, state, shutdown).await?;
    log::info!("[Server] stopped");
    Ok(())
}

/// SIGHUP re-parses the configuration file plus environment overrides. A
/// failed parse keeps the previous snapshot active.
fn spawn_reload_task(state: Arc<AppState>, config_path: PathBuf, cli_verbose: bool) {
    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("[Config] unable to install reload handler: {e}");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            log::info!("[Config] reload requested");
            match config::load(&config_path) {
                Ok(mut fresh) => {
                    fresh.verbose |= cli_verbose;
                    state.config.replace(fresh);
                    log::info!("[Config] loading new config");
                }
                Err(e) => {
                    log::error!("[Config] reload failed, keeping previous config: {e:#}");
                }
            }
        }
    });
}

/// Interrupt or terminate stops the accept loop; in-flight connections get
/// a bounded drain window.
fn spawn_shutdown_task(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("[Server] unable to install SIGTERM handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        log::info!("[Server] shutting down...");
        shutdown.cancel();
    });
}
