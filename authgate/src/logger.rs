use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    filter::Targets,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

/// Initialize the global `tracing` logger: compact events to stdout, INFO
/// and up by default, overridable per-target with `RUST_LOG`.
///
/// Panics if a logger is already installed.
pub fn init() {
    try_init().expect("Failed to set up logger");
}

/// Logger init for tests: does nothing unless `RUST_LOG` is set, and never
/// panics when several test threads race to install the logger.
pub fn init_for_testing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    let _ = try_init();
}

fn try_init() -> Result<(), TryInitError> {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|rust_log| Targets::from_str(&rust_log).ok())
        .unwrap_or_else(|| Targets::new().with_default(Level::INFO));

    let stdout_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_filter(filter);

    tracing_subscriber::registry().with(stdout_log).try_init()
}
