//! Tracing subscriber configuration for CSP nodes.
//!
//! Log levels follow these conventions:
//! - ERROR: Unrecoverable failures (buffer pool exhausted on a must-succeed path)
//! - WARN: Recoverable errors, unexpected but handled conditions
//! - INFO: Lifecycle events (stack initialised, interface added, shutdown)
//! - DEBUG: Connection and RDP state changes, dropped packets
//! - TRACE: Per-packet routing decisions and segment headers

use tracing_subscriber::EnvFilter;

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over `default_level`, which normally comes from the
/// `[logging]` section of the node configuration.
pub fn init(default_level: &str) {
    tracing_subscriber::fmt().with_env_filter(filter(default_level)).init();
}

/// Initialize the tracing subscriber with JSON output.
///
/// Activated by setting `RUST_LOG_FORMAT=json`.
pub fn init_json(default_level: &str) {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter(default_level))
        .init();
}

/// Initialize the tracing subscriber for tests.
///
/// Uses `try_init` so it can be called from every test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}
