//! Scheduler configuration structures.

use serde::{Deserialize, Serialize};

/// Smallest stack the dispatch thread may be given.
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Configuration for a scheduler's dispatch thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name assigned to the dispatch thread.
    pub thread_name: String,
    /// Stack size for the dispatch thread in bytes; `None` inherits the
    /// platform default.
    pub thread_stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "plan-dispatch".into(),
            thread_stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// The default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dispatch thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the dispatch thread stack size in bytes.
    #[must_use]
    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Describes the first offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.thread_name.trim().is_empty() {
            return Err("thread_name must not be empty".into());
        }
        if let Some(size) = self.thread_stack_size {
            if size < MIN_STACK_SIZE {
                return Err(format!(
                    "thread_stack_size must be at least {MIN_STACK_SIZE} bytes"
                ));
            }
        }
        Ok(())
    }

    /// Parse a scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// A parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_thread_name_rejected() {
        let cfg = SchedulerConfig::new().with_thread_name("  ");
        let err = cfg.validate().expect_err("blank name must fail");
        assert!(err.contains("thread_name"));
    }

    #[test]
    fn test_tiny_stack_rejected() {
        let cfg = SchedulerConfig::new().with_thread_stack_size(1024);
        let err = cfg.validate().expect_err("tiny stack must fail");
        assert!(err.contains("thread_stack_size"));
    }

    #[test]
    fn test_from_json_str_round_trip() {
        let cfg = SchedulerConfig::new()
            .with_thread_name("billing-dispatch")
            .with_thread_stack_size(2 * 1024 * 1024);
        let json = serde_json::to_string(&cfg).expect("serialize");
        let parsed = SchedulerConfig::from_json_str(&json).expect("parse back");
        assert_eq!(parsed.thread_name, "billing-dispatch");
        assert_eq!(parsed.thread_stack_size, Some(2 * 1024 * 1024));
    }

    #[test]
    fn test_from_json_str_defaults_missing_fields() {
        let parsed = SchedulerConfig::from_json_str("{}").expect("defaults apply");
        assert_eq!(parsed.thread_name, "plan-dispatch");
        assert_eq!(parsed.thread_stack_size, None);
    }

    #[test]
    fn test_from_json_str_rejects_invalid() {
        let err = SchedulerConfig::from_json_str(r#"{"thread_name": ""}"#)
            .expect_err("blank name must fail");
        assert!(err.contains("thread_name"));
    }
}
