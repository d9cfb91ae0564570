//! Pipeline run configuration.

use crate::channel::DEFAULT_HANDOFF_CAPACITY;
use crate::errors::{PipelineError, Result};
use crate::transform::FailureTrigger;
use serde::{Deserialize, Serialize};

/// Configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of items the source emits.
    #[serde(default = "default_item_count")]
    pub item_count: u64,
    /// Injected failure point. Its meaning depends on the execution strategy.
    #[serde(default)]
    pub fail_at: FailureTrigger,
    /// Fan-out degree of the mediator stage.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of every hand-off channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_item_count() -> u64 {
    5
}

fn default_workers() -> usize {
    2
}

fn default_channel_capacity() -> usize {
    DEFAULT_HANDOFF_CAPACITY
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            item_count: default_item_count(),
            fail_at: FailureTrigger::never(),
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the number of source items.
    #[must_use]
    pub const fn with_item_count(mut self, item_count: u64) -> Self {
        self.item_count = item_count;
        self
    }

    /// Sets the failure trigger.
    #[must_use]
    pub const fn with_fail_at(mut self, fail_at: i64) -> Self {
        self.fail_at = FailureTrigger::at(fail_at);
        self
    }

    /// Sets the mediator fan-out degree.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the hand-off channel capacity.
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Checks that the configuration can run.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.item_count, 5);
        assert_eq!(config.fail_at, FailureTrigger::never());
        assert_eq!(config.workers, 2);
        assert_eq!(config.channel_capacity, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = PipelineConfig::from_json(r#"{"item_count": 10, "fail_at": 3}"#).unwrap();
        assert_eq!(config.item_count, 10);
        assert_eq!(config.fail_at, FailureTrigger::at(3));
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_from_json_null_trigger() {
        let config = PipelineConfig::from_json(r#"{"fail_at": null}"#).unwrap();
        assert_eq!(config.fail_at, FailureTrigger::never());
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let err = PipelineConfig::new().with_workers(0).validate().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));

        assert!(PipelineConfig::from_json(r#"{"channel_capacity": 0}"#).is_err());
        assert!(PipelineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_builders() {
        let config = PipelineConfig::new()
            .with_item_count(3)
            .with_fail_at(2)
            .with_workers(4)
            .with_channel_capacity(8);
        assert_eq!(config.item_count, 3);
        assert_eq!(config.fail_at.value(), Some(2));
        assert_eq!(config.workers, 4);
        assert_eq!(config.channel_capacity, 8);
    }
}
