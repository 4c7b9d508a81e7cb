//! Builder constructing a scheduler from configuration.

use crate::config::SchedulerConfig;
use crate::core::error::SchedulerError;
use crate::core::scheduler::Scheduler;

/// Fluent builder over [`SchedulerConfig`].
///
/// ```
/// use replan::builders::SchedulerBuilder;
///
/// let scheduler = SchedulerBuilder::new()
///     .thread_name("billing-dispatch")
///     .build()
///     .expect("valid configuration");
/// scheduler.shutdown();
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    /// Builder seeded with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Name for the dispatch thread.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Stack size for the dispatch thread, in bytes.
    #[must_use]
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.config.thread_stack_size = Some(bytes);
        self
    }

    /// Validate the configuration and start the scheduler.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] if validation fails,
    /// [`SchedulerError::Spawn`] if the dispatch thread cannot be started.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        Scheduler::with_config(self.config)
    }
}
