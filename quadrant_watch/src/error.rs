//! Error types for the activity engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for activity engine operations.
pub type ActivityResult<T> = Result<T, ActivityError>;

/// Errors that can occur while ingesting frames or loading configuration.
///
/// A dimension change between two frames of the same region is *not* an
/// error; it is reported as a 100% change.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Activity pipeline has been shut down")]
    PipelineClosed,

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl ActivityError {
    /// Create an invalid frame error.
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame(message.into())
    }

    /// Create a config I/O error for `path`.
    pub fn config_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ConfigIo {
            path: path.into(),
            source,
        }
    }

    /// Create a worker failure error.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker(message.into())
    }
}
