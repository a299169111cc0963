//! Tracing initialization for the daemon binary.

use tracing_subscriber::EnvFilter;

/// Initialize console logging at the given level, overridable per module
/// through `RUST_LOG`.
pub fn init_console_logging(level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("invalid log level {level:?}: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| e.to_string())
}
