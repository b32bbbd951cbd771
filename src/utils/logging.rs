//! Structured logging set-up.
//!
//! The library only emits `tracing` events. Applications that want them printed call
//! [`init_logging`] once at start-up; `RUST_LOG` overrides the configured level.

use crate::config::LoggingConfig;
use crate::error::{Result, RpcError};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global subscriber according to `config`.
///
/// Console and file output are separate layers, so both can be active at once. With
/// neither enabled, events still go to the console.
///
/// Fails if a global subscriber is already installed or the log file cannot be opened.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()));

    let file_layer = match (config.log_to_file, config.log_file_path.as_deref()) {
        (true, Some(path)) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| RpcError::ConfigError(format!("Failed to open log file: {e}")))?;
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        _ => None,
    };
    let console_layer = (config.log_to_console || file_layer.is_none())
        .then(|| fmt::layer().with_target(true));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| RpcError::ConfigError(format!("Failed to install logger: {e}")))?;

    tracing::info!(
        app = %config.app_name,
        level = %config.log_level,
        console = config.log_to_console,
        file = config.log_to_file,
        "Logging initialized"
    );
    Ok(())
}
