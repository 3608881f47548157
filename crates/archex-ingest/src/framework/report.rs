//! Run report
//!
//! Built once, single-threaded, after every partition has finished. Workers
//! and writers never touch shared counters; they hand back their local
//! outcome lists and this module folds them together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::types::{duration_millis, BatchCommitResult, FileOutcome, FileStatus};

/// Error detail for one failed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub error: String,
}

/// Aggregated result of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "duration_millis", rename = "elapsed_ms")]
    pub elapsed: Duration,

    pub total_units: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,

    pub total_records_extracted: u64,
    pub total_records_committed: u64,
    pub total_defects: u64,

    pub batches_committed: usize,
    pub batches_failed: usize,

    /// Committed records per second of wall-clock time
    pub throughput_records_per_sec: f64,

    /// Whether the run was stopped by a cancellation request
    pub cancelled: bool,

    pub file_errors: Vec<FileError>,
    pub outcomes: Vec<FileOutcome>,
    pub batches: Vec<BatchCommitResult>,
}

impl RunReport {
    /// Fold per-partition outcomes and batch results into one report
    pub fn aggregate(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        elapsed: Duration,
        mut outcomes: Vec<FileOutcome>,
        mut batches: Vec<BatchCommitResult>,
        cancelled: bool,
    ) -> Self {
        outcomes.sort_by(|a, b| a.path.cmp(&b.path));
        batches.sort_by_key(|b| (b.partition, b.batch_number));

        let count = |status: FileStatus| outcomes.iter().filter(|o| o.status == status).count();
        let succeeded = count(FileStatus::Succeeded);
        let failed = count(FileStatus::Failed);
        let skipped = count(FileStatus::Skipped);

        let total_records_extracted = outcomes.iter().map(|o| o.record_count).sum();
        let total_defects = outcomes.iter().map(|o| o.defect_count).sum();

        let total_records_committed = batches
            .iter()
            .filter(|b| b.committed)
            .map(|b| b.batch_size as u64)
            .sum();
        let batches_committed = batches.iter().filter(|b| b.committed).count();
        let batches_failed = batches.len() - batches_committed;

        let file_errors = outcomes
            .iter()
            .filter(|o| o.status == FileStatus::Failed)
            .map(|o| FileError {
                path: o.path.clone(),
                error: o.error_detail.clone().unwrap_or_default(),
            })
            .collect();

        Self {
            run_id,
            started_at,
            finished_at,
            elapsed,
            total_units: outcomes.len(),
            succeeded,
            failed,
            skipped,
            total_records_extracted,
            total_records_committed,
            total_defects,
            batches_committed,
            batches_failed,
            throughput_records_per_sec: throughput(total_records_committed, elapsed),
            cancelled,
            file_errors,
            outcomes,
            batches,
        }
    }

    /// Report for a run with no task units
    pub fn empty(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self::aggregate(
            run_id,
            started_at,
            started_at,
            Duration::ZERO,
            Vec::new(),
            Vec::new(),
            false,
        )
    }

    /// Whether every unit succeeded and every batch committed
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.batches_failed == 0
    }

    /// Outcome for one path, if it was part of the run
    pub fn outcome(&self, path: &str) -> Option<&FileOutcome> {
        self.outcomes
            .binary_search_by(|o| o.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.outcomes[i])
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary for the terminal
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Run {}\n", self.run_id));
        out.push_str(&format!(
            "  Units:      {} total, {} succeeded, {} failed, {} skipped\n",
            self.total_units, self.succeeded, self.failed, self.skipped
        ));
        out.push_str(&format!(
            "  Records:    {} extracted, {} committed, {} defects\n",
            self.total_records_extracted, self.total_records_committed, self.total_defects
        ));
        out.push_str(&format!(
            "  Batches:    {} committed, {} failed\n",
            self.batches_committed, self.batches_failed
        ));
        out.push_str(&format!(
            "  Elapsed:    {:.2}s ({:.1} records/sec)\n",
            self.elapsed.as_secs_f64(),
            self.throughput_records_per_sec
        ));
        if self.cancelled {
            out.push_str("  Cancelled before completion\n");
        }
        if !self.file_errors.is_empty() {
            out.push_str("  Failed files:\n");
            for error in &self.file_errors {
                out.push_str(&format!("    {}: {}\n", error.path, error.error));
            }
        }
        out
    }
}

/// Committed records per second; zero when no time has elapsed
pub fn throughput(committed: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        committed as f64 / secs
    } else {
        0.0
    }
}
