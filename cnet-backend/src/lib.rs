//! HTTP API and worker process for the C-Net home-lab backend.

pub mod app;
pub mod bootstrap;
pub mod cli;
pub mod config_reloader;
pub mod error;
pub mod handlers;
pub mod state;
pub mod supervisor;
pub mod tracing_setup;
pub mod validation;

pub use app::{build_router, maintenance_router};
pub use supervisor::{SupervisorError, SupervisorOptions, WorkerSupervisor};
