//! C-Net Backend Server
//!
//! Serves the HTTP API. Hosts the worker supervisor in-process unless
//! `workers.embedded` is off, in which case a separate `cnet-worker` runs the
//! jobs this process enqueues.

use std::sync::Arc;

use tokio::net::TcpListener;

use cnet_backend::bootstrap::{build_authenticator, build_runtime, parse_bind_address};
use cnet_backend::cli::{load_config, CliArgs};
use cnet_backend::config_reloader::spawn_config_reloader;
use cnet_backend::supervisor::shutdown_signal;
use cnet_backend::tracing_setup::install_tracing_from_config;
use cnet_backend::{build_router, maintenance_router, SupervisorOptions, WorkerSupervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eprintln!("[STARTUP] C-Net backend starting...");
    let args = CliArgs::parse();

    if args.help_requested {
        CliArgs::print_help("cnet-backend");
        return Ok(());
    }

    let config_path = args.resolved_config_path();
    eprintln!("[STARTUP] Loading config from: {:?}", config_path);
    let config = load_config(config_path.as_deref())?;
    eprintln!("[STARTUP] Config loaded successfully");

    eprintln!("[STARTUP] Initializing tracing...");
    let reload_handle = install_tracing_from_config(&config.logging);

    eprintln!("[STARTUP] Setting up database and job queues...");
    let runtime = build_runtime(&config).await?;
    eprintln!("[STARTUP] Database ready");

    let supervisor = if config.workers.embedded {
        let supervisor = WorkerSupervisor::new(
            runtime.jobs.clone(),
            SupervisorOptions::from_config(&config.workers),
        );
        supervisor.initialize().await?;
        eprintln!("[STARTUP] Workers started");
        Some(supervisor)
    } else {
        tracing::info!("workers.embedded is off; enqueue only, cnet-worker runs jobs and the schedule");
        None
    };

    let (app, app_state) = match build_authenticator(&config) {
        Ok(authenticator) => {
            let state = Arc::new(runtime.app_state(authenticator));
            (build_router(state.clone()), Some(state))
        }
        Err(reason) => {
            eprintln!("[STARTUP] ERROR: Authentication failed: {}", reason);
            tracing::error!(%reason, "entering maintenance mode due to authentication configuration");
            (maintenance_router(reason), None)
        }
    };

    spawn_config_reloader(config_path, config.clone(), reload_handle, app_state);

    let addr = parse_bind_address(&config.server.host, config.server.port);
    let listener = TcpListener::bind(addr).await?;
    eprintln!("[STARTUP] Server listening on {addr}");
    tracing::info!(%addr, "server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(supervisor) = supervisor {
        tracing::info!("http server stopped, draining workers");
        supervisor.shutdown().await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}
