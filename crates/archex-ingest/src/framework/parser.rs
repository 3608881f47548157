//! Archive parsing capability
//!
//! The pipeline is polymorphic over exactly one capability: open a file and
//! pull its records incrementally. Implement [`ArchiveParser`] for each
//! archive format (MBOX, PST, ...).

use async_trait::async_trait;

use crate::error::ParseError;

/// One entry pulled from an archive
#[derive(Debug, Clone, PartialEq)]
pub enum RawEntry {
    /// A well-formed record payload
    Record(serde_json::Value),
    /// A malformed record; extraction continues with the next one
    Defect(String),
}

/// Opens archive files
#[async_trait]
pub trait ArchiveParser: Send + Sync {
    /// Open one archive for reading
    ///
    /// An error here fails the whole file.
    async fn open(&self, path: &str) -> Result<Box<dyn RecordReader>, ParseError>;

    /// Short name of the archive format, e.g. "mbox"
    fn format(&self) -> &str;

    /// File extensions this parser reads, without the leading dot
    ///
    /// Empty means the parser does not restrict what a task source lists.
    fn extensions(&self) -> &[&str] {
        &[]
    }
}

/// Incremental reader over one open archive
#[async_trait]
pub trait RecordReader: Send {
    /// Pull up to `limit` entries
    ///
    /// Returns an empty vector once the archive is exhausted. An error fails
    /// the whole file; entries already returned stay emitted.
    async fn next_chunk(&mut self, limit: usize) -> Result<Vec<RawEntry>, ParseError>;
}
