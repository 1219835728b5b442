// promptgate/src/logger.rs

use env_logger::{Builder, Env};

/// Initializes the application's logger.
///
/// The log level is determined by the `LOG_LEVEL` environment variable and
/// defaults to `info`. Logs go to stderr so piped scan output stays clean.
/// Call once at the beginning of the application's execution.
pub fn init_logger() {
    Builder::from_env(Env::default().filter_or("LOG_LEVEL", "info"))
        .format_timestamp_millis()
        .init();
}
