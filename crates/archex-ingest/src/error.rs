//! Error types for archive ingestion
//!
//! Only two conditions abort a run: enumeration failure and loss of the sink
//! connection. Everything else is recorded in the run report as data.

use thiserror::Error;

use crate::framework::report::RunReport;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Run-level error for archive ingestion
#[derive(Debug, Error)]
pub enum IngestError {
    /// Candidate files could not be listed; nothing was dispatched
    #[error("Enumeration of '{root}' failed: {reason}")]
    Enumeration { root: String, reason: String },

    /// The sink went away for the whole run
    ///
    /// `partial` holds the outcomes gathered before the run stopped.
    #[error("Sink unavailable: {reason}")]
    SinkUnavailable {
        reason: String,
        partial: Box<RunReport>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an enumeration error
    pub fn enumeration(root: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Enumeration {
            root: root.into(),
            reason: reason.into(),
        }
    }

    /// Partial report carried by a fatal sink failure
    pub fn partial_report(&self) -> Option<&RunReport> {
        match self {
            IngestError::SinkUnavailable { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// File-level failure raised by a parsing capability
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("Cannot open archive: {0}")]
    Open(String),

    #[error("Unsupported or corrupt archive format: {0}")]
    Format(String),

    #[error("Read failed: {0}")]
    Read(String),
}

impl From<std::io::Error> for ParseError {
    fn from(err: std::io::Error) -> Self {
        ParseError::Read(err.to_string())
    }
}

/// Failure reported by a sink
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// Worth retrying the same batch
    #[error("Transient sink failure: {0}")]
    Transient(String),

    /// The connection itself is gone
    #[error("Sink connection lost: {0}")]
    ConnectionLost(String),
}

impl SinkError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, SinkError::ConnectionLost(_))
    }
}
