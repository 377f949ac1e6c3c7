use thiserror::Error;

/// Result type for orchestration operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for broker primitives
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors surfaced by the orchestration layer
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Duplicate registration or malformed queue definition. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// The broker rejected or failed a submit call
    #[error("Failed to dispatch to queue '{queue}': {source}")]
    Dispatch {
        queue: String,
        #[source]
        source: BrokerError,
    },

    /// A cleanup pass against one queue failed
    #[error("Failed to clean queue '{queue}': {source}")]
    Cleanup {
        queue: String,
        #[source]
        source: BrokerError,
    },

    /// Lookup or control call failed at the broker
    #[error("Broker call for queue '{queue}' failed: {source}")]
    Broker {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Broker error underneath this failure, if any
    pub fn broker_cause(&self) -> Option<&BrokerError> {
        match self {
            Self::Dispatch { source, .. }
            | Self::Cleanup { source, .. }
            | Self::Broker { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Failures reported by a broker implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker call timed out: {0}")]
    Timeout(String),

    #[error("Broker rejected request: {0}")]
    Rejected(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Queue not known to broker: {0}")]
    QueueNotFound(String),

    #[error("Broker internal error: {0}")]
    Internal(String),
}

/// Job execution outcome - determines retry behavior
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// Retryable error - will schedule retry if attempts remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent error - fail immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn dispatch_error_keeps_broker_cause() {
        let err = QueueError::Dispatch {
            queue: "email-queue".to_string(),
            source: BrokerError::Timeout("submit after 5s".to_string()),
        };

        assert!(err.to_string().contains("email-queue"));
        assert!(err.to_string().contains("submit after 5s"));
        let source = err.source().expect("source attached");
        assert_eq!(source.to_string(), "Broker call timed out: submit after 5s");
        assert_eq!(
            err.broker_cause(),
            Some(&BrokerError::Timeout("submit after 5s".to_string()))
        );
    }

    #[test]
    fn job_error_retryability() {
        assert!(JobError::retryable("smtp busy").is_retryable());
        assert!(!JobError::permanent("bad address").is_retryable());
        assert_eq!(JobError::permanent("bad address").message(), "bad address");
    }
}
