//! Logging setup for embedders and tests

use flexi_logger::{Logger, LoggerHandle};
use parking_lot::Mutex;
use std::sync::Once;

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

/// Keeps the logger alive for the life of the process.
static LOGGER: Mutex<Option<LoggerHandle>> = parking_lot::const_mutex(None);

/// Installs a global logger configured from `RUST_LOG` (default `info`).
///
/// Safe to call any number of times; only the first call has an effect.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        match Logger::try_with_env_or_str("info").and_then(|logger| logger.start()) {
            Ok(handle) => *LOGGER.lock() = Some(handle),
            Err(e) => eprintln!("weft: failed to initialize logging: {}", e),
        }
    });
}
