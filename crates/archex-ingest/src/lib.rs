//! Archex Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Partitioned, parallel extraction of records from archive files (mailboxes)
//! with batched, idempotent commits to a persistent sink.
//!
//! # Architecture
//!
//! - **discovery**: enumerate archive files under a root directory
//! - **framework**: partition planner, extraction worker, batch commit writer,
//!   run coordinator and run report
//! - **mbox**: MBOX parsing capability
//! - **storage**: in-memory and SQLite sinks
//! - **pipeline**: enumeration plus coordinated run
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use archex_ingest::{FsTaskSource, IngestPipeline, MboxParser, PipelineConfig, SqliteSink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sink = SqliteSink::connect("sqlite://archive.db").await?;
//!     let pipeline = IngestPipeline::new(
//!         Arc::new(FsTaskSource::new("./mail")),
//!         Arc::new(MboxParser::new()),
//!         Arc::new(sink),
//!         PipelineConfig::from_env()?,
//!     );
//!
//!     let report = pipeline.run().await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod framework;
pub mod mbox;
pub mod pipeline;
pub mod storage;

pub use config::{PartitionCount, PartitionStrategy, PipelineConfig};
pub use discovery::{FsTaskSource, TaskSource};
pub use error::{IngestError, ParseError, Result, SinkError};
pub use framework::{RunCoordinator, RunReport};
pub use mbox::MboxParser;
pub use pipeline::IngestPipeline;
pub use storage::{MemorySink, SqliteSink};
