//! Archex Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities and error handling for the archex workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used across all archex workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: Content hashing and deterministic record identifiers
//! - **Logging**: Centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use archex_common::checksum::{content_md5, record_identifier};
//! use archex_common::Result;
//!
//! fn identify(path: &str, sequence: u64, payload: &serde_json::Value) -> Result<String> {
//!     let digest = content_md5(payload)?;
//!     Ok(record_identifier(path, sequence, &digest))
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{ArchexError, Result};
