//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The scheduler has been shut down and is permanently unusable.
    #[error("scheduler has been shut down")]
    ShutDown,
    /// The dispatch thread could not be spawned.
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
///
/// Plan work bodies return this; an `Err` is recorded as the plan's last
/// error and surfaced through the finish notification, never re-raised.
pub type AppResult<T> = Result<T, anyhow::Error>;
