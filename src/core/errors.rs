use thiserror::Error;

/// Errors raised while setting up or driving a scheduler.
///
/// Task-level failures never show up here: they are recorded on the task
/// itself and reported through events and callbacks.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Configuration file could not be read
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration document could not be parsed
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The background worker thread could not be created
    #[error("Failed to spawn worker thread '{thread_name}'")]
    WorkerSpawn {
        thread_name: String,
        #[source]
        source: std::io::Error,
    },
}

impl SchedulerError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
            Self::WorkerSpawn { .. } => "worker",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl From<serde_yaml::Error> for SchedulerError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SchedulerError::configuration("bad value");
        assert!(matches!(err, SchedulerError::Configuration { field: None, .. }));
        assert_eq!(err.category(), "configuration");
        assert_eq!(err.to_string(), "Configuration error: bad value");
    }

    #[test]
    fn test_configuration_field() {
        let err = SchedulerError::configuration_field("must be positive", "dequeue_timeout_ms");
        if let SchedulerError::Configuration { field, .. } = err {
            assert_eq!(field.as_deref(), Some("dequeue_timeout_ms"));
        } else {
            panic!("Expected configuration error");
        }
    }

    #[test]
    fn test_yaml_conversion() {
        let parse: std::result::Result<u32, _> = serde_yaml::from_str("[not, a, number]");
        let err: SchedulerError = parse.unwrap_err().into();
        assert_eq!(err.category(), "serialization");
        assert!(std::error::Error::source(&err).is_some());
    }
}
