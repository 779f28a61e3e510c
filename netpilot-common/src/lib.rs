//! NetPilot process plumbing shared by binaries.
//!
//! Provides the global logger, runtime directory handling and the OS signal
//! listener that drives graceful shutdown.
mod logger;

pub use logger::{parse_level, Logger};
pub use netpilot_error::{NPError, NPResult};

use netpilot_models::settings::Settings;
#[cfg(windows)]
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Load settings, switch to the runtime directory and install the logger.
///
/// The returned logger must be kept alive for the file sink to flush.
pub fn bootstrap(config_path: String) -> NPResult<(Settings, Logger)> {
    let settings = Settings::new(config_path)?;
    apply_runtime_dir(&settings.general.runtime_dir)?;

    let mut logger = Logger::from_config(&settings.log);
    logger.initialize(&settings.log)?;
    info!(level = %logger.get_level(), "Logger initialized");
    Ok((settings, logger))
}

/// Switch the process working directory so relative paths (logs) resolve under it.
pub fn apply_runtime_dir(runtime_dir: &str) -> NPResult<()> {
    let dir = runtime_dir.trim();
    if dir.is_empty() || dir == "." {
        return Ok(());
    }

    std::fs::create_dir_all(dir)
        .map_err(|e| NPError::from(format!("Failed to create runtime_dir {dir}: {e}")))?;

    std::env::set_current_dir(dir)
        .map_err(|e| NPError::from(format!("Failed to set current_dir to {dir}: {e}")))?;

    Ok(())
}

/// Resolve once a termination signal arrives or `token` is cancelled.
pub async fn wait_for_shutdown(token: CancellationToken) -> NPResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            NPError::InitializationError(format!("failed to register SIGTERM handler: {e}"))
        })?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            NPError::InitializationError(format!("failed to register SIGINT handler: {e}"))
        })?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT signal");
            }
            _ = token.cancelled() => {}
        }
    }

    #[cfg(windows)]
    {
        tokio::select! {
            _ = ctrl_c() => {
                info!("Received ctrl-c signal");
            }
            _ = token.cancelled() => {}
        }
    }

    Ok(())
}
