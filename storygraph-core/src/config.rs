//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} must be at least {min}, got {value}")]
    TooSmall {
        field: &'static str,
        min: u64,
        value: u64,
    },
}

/// What to do when the extractor returns a batch that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedBatchPolicy {
    /// Ask the extractor again, within the retry budget.
    #[default]
    Retry,
    /// Stop processing the book.
    Halt,
}

/// Tunables of the state engine and its driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Chapters kept at full resolution in episodic memory.
    pub episodic_window: usize,

    /// Pending chapter summaries that trigger consolidation.
    pub consolidation_threshold: usize,

    /// Coordinator steps before the run is declared stalled.
    pub max_iterations: u64,

    /// Minimum length of an evidence quote, in characters.
    pub min_quote_len: usize,

    /// Minimum length of a relation label, in characters.
    pub min_relation_type_len: usize,

    /// Retries for a retryable collaborator failure.
    pub max_retries: u32,

    /// Handling of malformed fact batches.
    pub malformed_batch_policy: MalformedBatchPolicy,

    /// Persist a checkpoint every N state updates.
    pub checkpoint_every: Option<u32>,

    /// Where checkpoints are written.
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            episodic_window: 5,
            consolidation_threshold: 20,
            max_iterations: 10_000,
            min_quote_len: 10,
            min_relation_type_len: 3,
            max_retries: 3,
            malformed_batch_policy: MalformedBatchPolicy::Retry,
            checkpoint_every: None,
            checkpoint_path: None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the episodic window size.
    pub fn with_episodic_window(mut self, window: usize) -> Self {
        self.episodic_window = window;
        self
    }

    /// Set the consolidation threshold.
    pub fn with_consolidation_threshold(mut self, threshold: usize) -> Self {
        self.consolidation_threshold = threshold;
        self
    }

    /// Set the iteration ceiling.
    pub fn with_max_iterations(mut self, max: u64) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the malformed batch policy.
    pub fn with_malformed_batch_policy(mut self, policy: MalformedBatchPolicy) -> Self {
        self.malformed_batch_policy = policy;
        self
    }

    /// Persist a checkpoint to `path` every `every` state updates.
    pub fn with_checkpoints(mut self, path: impl Into<PathBuf>, every: u32) -> Self {
        self.checkpoint_path = Some(path.into());
        self.checkpoint_every = Some(every);
        self
    }

    /// Check that every bound is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, u64, u64); 4] = [
            ("episodic_window", 1, self.episodic_window as u64),
            ("consolidation_threshold", 1, self.consolidation_threshold as u64),
            ("max_iterations", 1, self.max_iterations),
            (
                "checkpoint_every",
                1,
                self.checkpoint_every.map(u64::from).unwrap_or(1),
            ),
        ];
        for (field, min, value) in checks {
            if value < min {
                return Err(ConfigError::TooSmall { field, min, value });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.episodic_window, 5);
        assert_eq!(config.consolidation_threshold, 20);
        assert_eq!(config.max_iterations, 10_000);
        assert_eq!(config.malformed_batch_policy, MalformedBatchPolicy::Retry);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"episodic_window": 3, "malformed_batch_policy": "halt"}"#,
        )
        .unwrap();
        assert_eq!(config.episodic_window, 3);
        assert_eq!(config.malformed_batch_policy, MalformedBatchPolicy::Halt);
        assert_eq!(config.consolidation_threshold, 20);
    }

    #[test]
    fn test_rejects_zero_window() {
        let err = EngineConfig::from_json_str(r#"{"consolidation_threshold": 0}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooSmall {
                field: "consolidation_threshold",
                ..
            }
        ));
        assert!(EngineConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_episodic_window(2)
            .with_max_retries(0)
            .with_checkpoints("/tmp/book.json", 10);
        assert_eq!(config.episodic_window, 2);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.checkpoint_every, Some(10));
    }
}
