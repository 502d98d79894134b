//! Telemetry helpers for structured logging.

/// Install a default env-filtered fmt subscriber unless one is already set.
///
/// Library users normally bring their own subscriber; tests and small tools
/// call this once at startup and control verbosity through `RUST_LOG`.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
