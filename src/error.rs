//! Error types for StrataKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for StrataKV operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Sorted run corrupted: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    /// The memtable is over its flush threshold while a flush is still
    /// running. The write was not applied; retry once the flush completes.
    #[error("Memory tables are full, wait for the background flush to complete")]
    NoCapacity,

    #[error("Wait for the flush gate was interrupted")]
    Interrupted,

    #[error("Engine is closed")]
    Closed,

    #[error("Background task failed: {0}")]
    BackgroundTask(String),
}

impl StrataError {
    /// Whether the caller may simply retry the same operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrataError::NoCapacity)
    }
}

impl From<bincode::Error> for StrataError {
    fn from(e: bincode::Error) -> Self {
        StrataError::Serialization(e.to_string())
    }
}
