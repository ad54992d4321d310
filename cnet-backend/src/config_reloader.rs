//! Re-reads the configuration file on SIGHUP and applies the parts that can
//! change without a restart: the log filter and the JWT secret.

use std::sync::Arc;

use cnet_config::Config;

use crate::bootstrap::build_authenticator;
use crate::state::AppState;
use crate::tracing_setup::ReloadHandle;

/// Spawn the reload task. Does nothing on platforms without SIGHUP.
pub fn spawn_config_reloader(
    config_path: Option<String>,
    current: Config,
    reload_handle: ReloadHandle,
    app_state: Option<Arc<AppState>>,
) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%e, "SIGHUP handler unavailable; config reload disabled");
                return;
            }
        };
        let mut current = current;

        while hangup.recv().await.is_some() {
            let new_cfg = match crate::cli::load_config(config_path.as_deref()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::error!(%e, "failed to reload config file, keeping current settings");
                    continue;
                }
            };
            if new_cfg == current {
                tracing::info!("configuration unchanged");
                continue;
            }
            apply_reload(&current, &new_cfg, &reload_handle, app_state.as_deref());
            current = new_cfg;
        }
    });

    #[cfg(not(unix))]
    {
        let _ = (config_path, current, reload_handle, app_state);
    }
}

/// Apply the reloadable differences between `old` and `new`.
pub fn apply_reload(
    old: &Config,
    new: &Config,
    reload_handle: &ReloadHandle,
    state: Option<&AppState>,
) {
    if old.logging.level != new.logging.level {
        let filter = tracing_subscriber::EnvFilter::new(new.logging.level.clone());
        match reload_handle(filter) {
            Ok(()) => tracing::info!(new_level = %new.logging.level, "log level updated at runtime"),
            Err(e) => tracing::error!(%e, "failed to reload log level"),
        }
    }

    if old.auth.jwt_secret != new.auth.jwt_secret {
        let Some(state) = state else {
            tracing::warn!("jwt secret changed while in maintenance mode; restart to apply");
            return;
        };
        match build_authenticator(new) {
            Ok(auth) => {
                state.swap_authenticator(auth);
                tracing::info!("swapped authenticator at runtime");
            }
            Err(e) => tracing::error!(
                %e,
                "new authenticator failed to build; leaving existing authenticator in place"
            ),
        }
    }

    if old.database != new.database || old.workers != new.workers {
        tracing::warn!("database and worker settings take effect after a restart");
    }
}
