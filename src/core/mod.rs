// Core infrastructure shared by the task model and the scheduler

pub mod config;
pub mod errors;

// Re-export commonly used types
pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use errors::{Result, SchedulerError};
