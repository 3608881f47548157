//! Error types for archex

use thiserror::Error;

/// Result type alias for archex operations
pub type Result<T> = std::result::Result<T, ArchexError>;

/// Main error type for archex
#[derive(Error, Debug)]
pub enum ArchexError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
