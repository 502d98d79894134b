//! Shared utilities.

/// Wall-clock helpers.
pub mod clock;
/// Telemetry helpers for structured logging and tracing.
pub mod telemetry;

pub use clock::*;
pub use telemetry::*;
