//! Error types for the file monitor.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur in the file monitor.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The kernel backend failed to establish a watch for a reason other
    /// than the target being absent.
    #[error("could not watch {path}: {reason}")]
    SubscribeFailed { path: PathBuf, reason: String },

    /// The subscribed path cannot be split into a directory and file name.
    #[error("invalid watch target: {0}")]
    InvalidTarget(String),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
