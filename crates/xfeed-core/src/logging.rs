//! Logging initialization using the `tracing` ecosystem.
//!
//! - Console output (colored, human-readable)
//! - Optional file output (daily rotation via `tracing-appender`)
//! - Level from `RUST_LOG`, falling back to the configured level

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// Should be called once at program start. A second call is a no-op apart from
/// a warning, so tests and embedding applications may call it freely.
///
/// # Parameters
///
/// - `log_level`: default level if `RUST_LOG` env var is not set (e.g. `"info"`)
/// - `log_dir`: optional directory for daily-rotating log files
/// - `module_name`: used as the log file prefix (e.g. `"xfeed"`)
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(true);

    let result = if let Some(dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(dir, format!("{module_name}.log"));
        let file_layer = fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
    };

    if let Err(e) = result {
        tracing::warn!("logging already initialised: {e}");
    }
}
