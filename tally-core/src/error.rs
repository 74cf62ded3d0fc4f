//! Error types for tally-core

use thiserror::Error;

/// Main error type for the tally-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Settings store error
    #[error("storage error: {0}")]
    Storage(String),

    /// Persisted queue file could not be decoded
    #[error("queue format error: {0}")]
    Format(String),

    /// Persisted queue file was written by another format version
    #[error("unsupported queue file version {found} (current version is {expected})")]
    UnsupportedVersion { found: i32, expected: i32 },

    /// Delivery/network error
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Async runtime could not be created
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for tally-core
pub type Result<T> = std::result::Result<T, Error>;
