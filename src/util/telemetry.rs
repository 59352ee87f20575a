//! Tracing bootstrap for binaries and tests embedding the scheduler.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: lifecycle at info, per-tick activity of this crate
/// at debug.
pub const DEFAULT_FILTER: &str = "info,prometheus_work_scheduler=debug";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
///
/// Does nothing if a global subscriber is already set, so embedders can install their own.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    init_tracing_with(filter);
}

/// Install a fmt subscriber with an explicit filter, unless one is already set.
pub fn init_tracing_with(filter: EnvFilter) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
