//! Structured logging infrastructure for Monitor.
//!
//! Centralized subscriber setup with either human-readable or JSON output.
//! Filtering follows `RUST_LOG`, defaulting to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logging system with human-readable output.
///
/// # Example
/// ```no_run
/// use monitor_core::logging;
///
/// logging::init();
/// tracing::info!("Client started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize the logging system with JSON output for log aggregation.
///
/// # Example
/// ```no_run
/// use monitor_core::logging;
///
/// logging::init_json();
/// tracing::info!(group = "plant-a", "Subscription started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize logging according to the `[logging]` config section.
pub fn init_from(config: &LoggingConfig) {
    if config.json {
        init_json();
    } else {
        init();
    }
}
