//! Structured logging setup
//!
//! Human-readable or JSON output on stderr, with an optional append-mode
//! log file. `RUST_LOG` takes precedence over the configured level.
//! Stdout is left to command output so `list --json` stays parseable.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::Result;

/// Builds the filter: `RUST_LOG` first, then `config.level`.
fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?)
}

/// Initializes the global subscriber from `config`.
///
/// Calling it again once a subscriber is installed is a no-op.
///
/// # Errors
///
/// Returns an error if the level is not a valid filter directive or the
/// log file cannot be opened.
///
/// # Examples
///
/// ```no_run
/// use smartmark::config::LoggingConfig;
/// use smartmark::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "smartmark=debug".to_string(),
///     json_format: false,
///     file_path: None,
/// };
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config)?);

    let file = match config.file_path {
        Some(ref path) => Some(Arc::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    let installed = if config.json_format {
        let stderr_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);
        let file_layer = file.map(|f| fmt::layer().json().with_current_span(true).with_writer(f));
        registry.with(stderr_layer).with(file_layer).try_init()
    } else {
        let stderr_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr);
        let file_layer = file.map(|f| {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(f)
        });
        registry.with(stderr_layer).with(file_layer).try_init()
    };

    if installed.is_err() {
        tracing::debug!("Logging already initialized");
    }
    Ok(())
}
