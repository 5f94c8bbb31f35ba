use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Result, SchedulerError};

/// Scheduler configuration with all tuning parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on a single ready-queue wait, keeps pause/stop responsive
    pub dequeue_timeout_ms: u64,
    /// Upper bound on joining the worker in `stop_execution`
    pub stop_join_timeout_ms: u64,
    /// Priority increment applied when a task is requeued because it is not ready
    pub dependency_penalty: u32,
    /// Pause after requeuing a not-ready task
    pub requeue_backoff_ms: u64,
    /// Maximum number of entries in the ready queue (`None` = unbounded)
    pub queue_capacity: Option<usize>,
    /// Name given to the background worker thread
    pub worker_thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout_ms: 100,
            stop_join_timeout_ms: 5_000,
            dependency_penalty: 10,
            requeue_backoff_ms: 10,
            queue_capacity: Some(10_000),
            worker_thread_name: "taskline-scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Create a new builder for SchedulerConfig
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    /// Parse a YAML document, missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::io(format!("read {}", path.display()), e))?;
        Self::from_yaml_str(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.dequeue_timeout_ms == 0 {
            return Err(SchedulerError::configuration_field(
                "dequeue_timeout_ms must be greater than 0",
                "dequeue_timeout_ms",
            ));
        }
        if self.stop_join_timeout_ms == 0 {
            return Err(SchedulerError::configuration_field(
                "stop_join_timeout_ms must be greater than 0",
                "stop_join_timeout_ms",
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(SchedulerError::configuration_field(
                "queue_capacity must be greater than 0",
                "queue_capacity",
            ));
        }
        if self.worker_thread_name.trim().is_empty() {
            return Err(SchedulerError::configuration_field(
                "worker_thread_name cannot be empty",
                "worker_thread_name",
            ));
        }
        Ok(())
    }

    /// Create a configuration with short waits, suited to tests
    pub fn development() -> Self {
        Self {
            dequeue_timeout_ms: 20,
            stop_join_timeout_ms: 1_000,
            requeue_backoff_ms: 2,
            queue_capacity: Some(1_000),
            ..Default::default()
        }
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }

    pub fn requeue_backoff(&self) -> Duration {
        Duration::from_millis(self.requeue_backoff_ms)
    }
}

/// Builder for SchedulerConfig
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    pub fn dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.config.dequeue_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn stop_join_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_join_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn dependency_penalty(mut self, penalty: u32) -> Self {
        self.config.dependency_penalty = penalty;
        self
    }

    pub fn requeue_backoff(mut self, backoff: Duration) -> Self {
        self.config.requeue_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.worker_thread_name = name.into();
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
