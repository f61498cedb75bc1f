//! Tracing subscriber setup

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Returns `false` if a subscriber was already installed.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
