//! Run coordinator
//!
//! Drives one end-to-end run:
//! 1. Probe the sink; an unreachable sink aborts before any work
//! 2. Plan partitions
//! 3. Dispatch each partition to a worker and its writer, bounded by `max_workers`
//! 4. Merge per-partition outcomes into a [`RunReport`]
//!
//! Partitions are never reassigned once dispatched. If one writer loses the
//! sink for good, the remaining partitions are cancelled and the caller gets
//! [`IngestError::SinkUnavailable`] carrying the partial report. In that
//! report a file only keeps the records the sink acknowledged.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::parser::ArchiveParser;
use super::planner::PartitionPlanner;
use super::report::RunReport;
use super::sink::RecordSink;
use super::types::{BatchCommitResult, FileOutcome, Partition, TaskUnit};
use super::worker::{ExtractionWorker, SKIPPED_CANCELLED};
use super::writer::BatchCommitWriter;
use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};

/// Detail on files whose records did not all reach the sink before it went away
pub const NOT_COMMITTED_SINK_LOST: &str = "not committed: sink lost";

/// Everything one partition hands back to the coordinator
struct PartitionResult {
    outcomes: Vec<FileOutcome>,
    batches: Vec<BatchCommitResult>,
    /// Set when the writer stopped because the sink went away
    sink_lost: Option<String>,
}

/// Coordinates a pipeline run over a fixed set of task units
pub struct RunCoordinator {
    parser: Arc<dyn ArchiveParser>,
    sink: Arc<dyn RecordSink>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl RunCoordinator {
    pub fn new(parser: Arc<dyn ArchiveParser>, sink: Arc<dyn RecordSink>, config: PipelineConfig) -> Self {
        Self {
            parser,
            sink,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run cooperatively when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline over `task_units`
    ///
    /// Only a sink that is unreachable for the run is returned as an error;
    /// file and batch failures are recorded in the report.
    #[instrument(skip_all, fields(units = task_units.len(), parser = self.parser.format()))]
    pub async fn run(&self, task_units: Vec<TaskUnit>) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        if let Err(e) = self.sink.check_connection().await {
            error!(sink = %self.sink.describe(), error = %e, "Sink unreachable, aborting run");
            return Err(IngestError::SinkUnavailable {
                reason: e.to_string(),
                partial: Box::new(RunReport::empty(run_id, started_at)),
            });
        }

        let partitions = PartitionPlanner::from_config(&self.config).plan(task_units);
        if partitions.is_empty() {
            info!(%run_id, "No task units to process");
            return Ok(RunReport::empty(run_id, started_at));
        }

        let workers = match self.config.max_workers {
            0 => partitions.len(),
            n => n.min(partitions.len()),
        };
        let commit_permit =
            (!self.sink.supports_concurrent_writers()).then(|| Arc::new(Semaphore::new(1)));

        info!(
            %run_id,
            partitions = partitions.len(),
            workers,
            batch_size = self.config.batch_size,
            sink = %self.sink.describe(),
            serialized_commits = commit_permit.is_some(),
            "Starting run"
        );

        // Child token: a lost sink stops this run without flagging the
        // caller's token as user-cancelled.
        let run_token = self.cancel.child_token();

        let results: Vec<PartitionResult> = stream::iter(partitions)
            .map(|partition| self.run_partition(partition, run_token.clone(), commit_permit.clone()))
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut outcomes = Vec::new();
        let mut batches = Vec::new();
        let mut sink_lost = None;
        for result in results {
            outcomes.extend(result.outcomes);
            batches.extend(result.batches);
            if sink_lost.is_none() {
                sink_lost = result.sink_lost;
            }
        }

        let report = RunReport::aggregate(
            run_id,
            started_at,
            Utc::now(),
            clock.elapsed(),
            outcomes,
            batches,
            self.cancel.is_cancelled(),
        );

        if let Some(reason) = sink_lost {
            error!(
                %run_id,
                %reason,
                committed = report.total_records_committed,
                "Run aborted: sink connection lost"
            );
            return Err(IngestError::SinkUnavailable {
                reason,
                partial: Box::new(report),
            });
        }

        info!(
            %run_id,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            records_committed = report.total_records_committed,
            batches_failed = report.batches_failed,
            elapsed_secs = report.elapsed.as_secs_f64(),
            throughput = report.throughput_records_per_sec,
            "Run finished"
        );

        Ok(report)
    }

    /// Extract and commit one partition; the worker and writer run side by side
    async fn run_partition(
        &self,
        partition: Partition,
        cancel: CancellationToken,
        commit_permit: Option<Arc<Semaphore>>,
    ) -> PartitionResult {
        let index = partition.index;

        if cancel.is_cancelled() {
            return PartitionResult {
                outcomes: partition
                    .units
                    .into_iter()
                    .map(|u| FileOutcome::skipped(u.path, SKIPPED_CANCELLED))
                    .collect(),
                batches: Vec::new(),
                sink_lost: None,
            };
        }

        let paths: Vec<String> = partition.units.iter().map(|u| u.path.clone()).collect();

        let worker = ExtractionWorker::from_config(self.parser.clone(), &self.config, cancel.clone());
        let mut writer = BatchCommitWriter::from_config(self.sink.clone(), index, &self.config);
        if let Some(permit) = commit_permit {
            writer = writer.with_commit_permit(permit);
        }

        let (records, extraction) = worker.spawn(partition, self.config.record_channel_capacity);

        let (batches, halted) = match writer.commit(records).await {
            Ok(batches) => (batches, None),
            Err(mut halted) => {
                cancel.cancel();
                (std::mem::take(&mut halted.batches), Some(halted))
            },
        };

        let mut outcomes = match extraction.await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(partition = index, error = %e, "Extraction task aborted");
                paths
                    .into_iter()
                    .map(|path| {
                        FileOutcome::failed(path, format!("extraction task aborted: {}", e), Default::default())
                    })
                    .collect()
            },
        };

        // Only records the sink acknowledged count once the writer stopped early.
        if let Some(halted) = &halted {
            for outcome in &mut outcomes {
                outcome.limit_to_committed(halted.committed_for(&outcome.path), NOT_COMMITTED_SINK_LOST);
            }
        }

        PartitionResult {
            outcomes,
            batches,
            sink_lost: halted.map(|h| h.reason),
        }
    }
}
