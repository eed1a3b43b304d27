//! Error types for the prompt queue library.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read or write the backing file.
    #[error("failed to access queue state: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted value is not valid JSON for the expected shape.
    #[error("failed to parse queue state: {0}")]
    Parse(#[from] serde_json::Error),

    /// Failed to acquire a file lock.
    #[error("failed to acquire lock on {0}")]
    Lock(PathBuf),

    /// A blocking persistence task panicked or was cancelled.
    #[error("persistence task failed: {0}")]
    Task(String),
}

/// Errors raised while handing a queue item to a delivery sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Could not create the output directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Could not write the prompt file.
    #[error("failed to write {path}: {source}")]
    Write {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A terminal host command could not be started or returned an error.
    #[error("session host command `{command}` failed: {message}")]
    Host {
        /// The host subcommand that failed (e.g. `list`, `send-text`).
        command: String,
        /// Description of the failure.
        message: String,
    },

    /// A host command did not finish within its time budget.
    #[error("`{command}` timed out after {seconds}s")]
    Timeout {
        /// The host subcommand that timed out.
        command: String,
        /// Budget that was exceeded.
        seconds: u64,
    },

    /// The prompt text could not be staged in a temporary file.
    #[error("failed to stage prompt file: {0}")]
    Staging(std::io::Error),

    /// The prompt became empty after removing control characters.
    #[error("prompt is empty after sanitizing")]
    EmptyPrompt,
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`QueueConfig`](crate::QueueConfig).
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value is out of range.
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Errors surfaced by the queue processor.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A delivery sink failed.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// No pending item has the requested id.
    #[error("no pending item with id {0}")]
    NotFound(String),
}
