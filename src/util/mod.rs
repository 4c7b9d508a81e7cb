//! Shared utilities.

pub mod clock;
pub mod telemetry;

pub use clock::{now_ms, until};
pub use telemetry::init_tracing;
