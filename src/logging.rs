//! # Logging
//!
//! Thin wrapper around `env_logger`/`log`, the same facade the rest of the
//! crate's ancestry uses. Structured context (`ctx_id`, `dev_eui`,
//! `gateway_id`) is embedded directly in the log message rather than through
//! a dedicated structured-logging crate — callers format it themselves with
//! `log::debug!("... ctx_id={ctx_id} dev_eui={dev_eui} ...")`.

use log::{debug, error, info, log_enabled, warn, Level};

/// Initializes the logger with the `env_logger` crate.
pub fn init_logger() {
    env_logger::init();
}

/// Logs an error message.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    }
}

/// Logs a warning message.
pub fn log_warn(message: &str) {
    if log_enabled!(Level::Warn) {
        warn!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}

/// Logs a debug message.
pub fn log_debug(message: &str) {
    if log_enabled!(Level::Debug) {
        debug!("{message}");
    }
}
