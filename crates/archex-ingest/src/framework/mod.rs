//! Partitioned extraction-and-commit framework
//!
//! Splits archive files into partitions, extracts each partition on its own
//! worker, commits records to a sink in bounded batches and reports every
//! per-file and per-batch failure without aborting the run.

pub mod types;
pub mod parser;
pub mod sink;
pub mod planner;
pub mod worker;
pub mod writer;
pub mod coordinator;
pub mod report;

// Re-export commonly used types
pub use types::{BatchCommitResult, ExtractedRecord, FileOutcome, FileStatus, Partition, TaskUnit};
pub use parser::{ArchiveParser, RawEntry, RecordReader};
pub use sink::RecordSink;
pub use planner::PartitionPlanner;
pub use worker::ExtractionWorker;
pub use writer::{BatchCommitWriter, WriterHalted};
pub use coordinator::{RunCoordinator, NOT_COMMITTED_SINK_LOST};
pub use report::{FileError, RunReport};
