//! Log output for test suites.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber that writes through the test
/// capture, and forwards `log` records into it.
///
/// `RUST_LOG` takes precedence; otherwise the filter is `warn` when
/// `silent` and `info` when not. Returns `false` if a subscriber or logger
/// was already installed, in which case nothing changes.
pub fn init_test_logging(silent: bool) -> bool {
    let default_filter = if silent { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    tracing_log::LogTracer::init().is_ok()
}
