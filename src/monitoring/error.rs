//! Monitoring error types.

// Layer 2: Third-party crate imports
use thiserror::Error;

/// Errors that can occur during monitoring operations.
#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("monitoring configuration error: {message}")]
    Configuration { message: String },

    #[error("failed to record event: {message}")]
    RecordError { message: String },

    #[error("failed to generate snapshot: {message}")]
    SnapshotError { message: String },
}

impl MonitoringError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn record(message: impl Into<String>) -> Self {
        Self::RecordError { message: message.into() }
    }

    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::SnapshotError { message: message.into() }
    }
}
