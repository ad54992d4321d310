//! C-Net Worker
//!
//! Runs the worker supervisor without the HTTP API and drains on SIGINT/SIGTERM.
//! Jobs come from the shared database, so a `cnet-backend` started with
//! `workers.embedded = false` enqueues and this process runs them.

use cnet_backend::bootstrap::build_runtime;
use cnet_backend::cli::{load_config, CliArgs};
use cnet_backend::tracing_setup::install_tracing_from_config;
use cnet_backend::{SupervisorOptions, WorkerSupervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eprintln!("[STARTUP] C-Net worker starting...");
    let args = CliArgs::parse();

    if args.help_requested {
        CliArgs::print_help("cnet-worker");
        return Ok(());
    }

    let config_path = args.resolved_config_path();
    eprintln!("[STARTUP] Loading config from: {:?}", config_path);
    let config = load_config(config_path.as_deref())?;
    let _reload = install_tracing_from_config(&config.logging);

    let runtime = build_runtime(&config).await?;
    let supervisor = WorkerSupervisor::new(
        runtime.jobs.clone(),
        SupervisorOptions::from_config(&config.workers),
    );
    supervisor.initialize().await?;
    eprintln!("[STARTUP] Workers started; waiting for jobs");

    supervisor.run_until_signal().await;
    tracing::info!("worker exited cleanly");
    Ok(())
}
