//! Pipeline configuration.

use std::path::Path;
use std::time::Duration;

use publisher_collections::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::PipelineResult;

/// Tuning knobs for a publishing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the NAL unit queue between producer and consumer.
    pub queue_capacity: usize,

    /// How long the consumer waits for a unit before re-checking the stop
    /// flag. Bounds shutdown latency.
    pub poll_interval_ms: u64,

    /// Bytes read per chunk by the file source.
    pub chunk_size: usize,

    /// Delay between file chunks (0 disables pacing).
    pub chunk_interval_ms: u64,

    /// Capacity of the push source's buffer queue.
    pub push_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: 1000,
            chunk_size: 1024,
            chunk_interval_ms: 10,
            push_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(PipelineError::ConfigRead)?;
        let config: Self = serde_json::from_str(&text)?;
        debug!(path = %path.display(), ?config, "Loaded pipeline config");
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.push_queue_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "push_queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_capacity, 500);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.chunk_interval(), Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "queue_capacity": 64, "chunk_interval_ms": 0 }"#).unwrap();
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.chunk_interval_ms, 0);
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let cases = [
            PipelineConfig {
                queue_capacity: 0,
                ..Default::default()
            },
            PipelineConfig {
                push_queue_capacity: 0,
                ..Default::default()
            },
            PipelineConfig {
                chunk_size: 0,
                ..Default::default()
            },
            PipelineConfig {
                poll_interval_ms: 0,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(PipelineError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!(
            "publisher-config-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{ "poll_interval_ms": 250 }"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.queue_capacity, 500);
    }

    #[test]
    fn test_from_json_file_missing() {
        let path = std::env::temp_dir().join("publisher-config-does-not-exist.json");
        assert!(matches!(
            PipelineConfig::from_json_file(path),
            Err(PipelineError::ConfigRead(_))
        ));
    }

    #[test]
    fn test_from_json_file_invalid_json() {
        let path = std::env::temp_dir().join(format!(
            "publisher-config-invalid-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "{ not json").unwrap();

        let result = PipelineConfig::from_json_file(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(PipelineError::ConfigParse(_))));
    }
}
