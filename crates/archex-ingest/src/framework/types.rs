//! Core types for the extraction pipeline

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One archive file to process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskUnit {
    /// Location of the archive, as enumerated
    pub path: String,
    /// Declared size on disk
    pub size_bytes: u64,
}

impl TaskUnit {
    pub fn new(path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
        }
    }

    /// Whether this unit must be extracted in bounded chunks
    ///
    /// Strictly greater than: a file exactly at the threshold is read whole.
    pub fn is_large(&self, threshold_bytes: u64) -> bool {
        self.size_bytes > threshold_bytes
    }
}

/// Ordered group of task units handed to exactly one worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Position of this partition in the plan
    pub index: usize,
    pub units: Vec<TaskUnit>,
}

impl Partition {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            units: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Sum of declared sizes of every unit in the partition
    pub fn total_bytes(&self) -> u64 {
        self.units.iter().map(|u| u.size_bytes).sum()
    }
}

/// One record extracted from an archive, ready for the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    /// Deterministic identifier (source path + sequence + content hash)
    pub record_id: String,
    /// Archive the record came from
    pub source_path: String,
    /// 0-based position of the record within its source file
    pub sequence: u64,
    /// MD5 of the canonical payload encoding
    pub content_md5: String,
    /// Record payload as produced by the parser
    pub payload: serde_json::Value,
}

/// Terminal status of one task unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl FileStatus {
    pub fn as_str(&self) -> &str {
        match self {
            FileStatus::Succeeded => "succeeded",
            FileStatus::Failed => "failed",
            FileStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of processing one task unit (exactly one per unit)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: String,
    pub status: FileStatus,
    /// Records emitted for this file
    pub record_count: u64,
    /// Malformed records skipped inside an otherwise healthy file
    pub defect_count: u64,
    pub error_detail: Option<String>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl FileOutcome {
    pub fn succeeded(path: impl Into<String>, record_count: u64, defect_count: u64, elapsed: Duration) -> Self {
        Self {
            path: path.into(),
            status: FileStatus::Succeeded,
            record_count,
            defect_count,
            error_detail: None,
            elapsed,
        }
    }

    /// File-level failure; records already streamed are added by the caller
    pub fn failed(path: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            path: path.into(),
            status: FileStatus::Failed,
            record_count: 0,
            defect_count: 0,
            error_detail: Some(error.into()),
            elapsed,
        }
    }

    /// Cap `record_count` at what the sink actually holds for this file
    ///
    /// A succeeded file with records missing from the sink becomes `failed`
    /// with `detail`; an existing failure keeps its own detail.
    pub fn limit_to_committed(&mut self, committed: u64, detail: &str) {
        if self.status == FileStatus::Skipped || self.record_count <= committed {
            return;
        }
        if self.status == FileStatus::Succeeded {
            self.status = FileStatus::Failed;
            self.error_detail = Some(detail.to_string());
        }
        self.record_count = committed;
    }

    pub fn skipped(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: FileStatus::Skipped,
            record_count: 0,
            defect_count: 0,
            error_detail: Some(reason.into()),
            elapsed: Duration::ZERO,
        }
    }
}

/// Result of flushing one batch to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCommitResult {
    /// Partition whose writer produced this batch
    pub partition: usize,
    /// 0-based batch number within that writer
    pub batch_number: u64,
    pub batch_size: usize,
    pub committed: bool,
    pub attempt_count: u32,
    pub error_detail: Option<String>,
}

/// Millisecond (de)serialization for `Duration` fields in reports
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
