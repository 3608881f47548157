//! Batch commit writer
//!
//! Consumes one partition's record stream, cuts it into `batch_size` batches
//! and upserts each batch atomically. A batch that keeps failing is recorded
//! as uncommitted and the writer moves on; only a sink that no longer answers
//! its connection probe stops the writer.

use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use super::sink::RecordSink;
use super::types::{BatchCommitResult, ExtractedRecord};
use crate::config::PipelineConfig;
use crate::error::SinkError;

/// Writer stopped because the sink connection is gone
#[derive(Debug, Error)]
#[error("Sink connection lost after {} batches: {reason}", .batches.len())]
pub struct WriterHalted {
    pub reason: String,
    /// Batches processed before the writer stopped, including the failed one
    pub batches: Vec<BatchCommitResult>,
    /// Records of each source path that reached the sink before the stop
    pub committed_per_source: HashMap<String, u64>,
}

impl WriterHalted {
    /// Committed record count for `path`
    pub fn committed_for(&self, path: &str) -> u64 {
        self.committed_per_source.get(path).copied().unwrap_or(0)
    }
}

/// Commits one partition's records to the sink
pub struct BatchCommitWriter {
    sink: Arc<dyn RecordSink>,
    partition: usize,
    batch_size: usize,
    retry_ceiling: u32,
    backoff: Duration,
    /// Shared single permit when the sink accepts one writer at a time
    commit_permit: Option<Arc<Semaphore>>,
}

impl BatchCommitWriter {
    pub fn new(
        sink: Arc<dyn RecordSink>,
        partition: usize,
        batch_size: usize,
        retry_ceiling: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            sink,
            partition,
            batch_size: batch_size.max(1),
            retry_ceiling: retry_ceiling.max(1),
            backoff,
            commit_permit: None,
        }
    }

    pub fn from_config(sink: Arc<dyn RecordSink>, partition: usize, config: &PipelineConfig) -> Self {
        Self::new(
            sink,
            partition,
            config.batch_size,
            config.commit_retry_ceiling,
            config.commit_retry_backoff(),
        )
    }

    /// Serialize commits with every other writer holding the same permit
    pub fn with_commit_permit(mut self, permit: Arc<Semaphore>) -> Self {
        self.commit_permit = Some(permit);
        self
    }

    /// Drain `records` into the sink, one result per batch
    ///
    /// The final partial batch is flushed when the stream ends. On
    /// [`WriterHalted`] the stream is dropped, which stops its producer.
    #[instrument(skip_all, fields(partition = self.partition, batch_size = self.batch_size))]
    pub async fn commit<S>(&self, records: S) -> Result<Vec<BatchCommitResult>, WriterHalted>
    where
        S: Stream<Item = ExtractedRecord> + Send,
    {
        let mut records = pin!(records);
        // Grows with what actually arrives; `batch_size` is only a flush mark.
        let mut buffer: Vec<ExtractedRecord> = Vec::new();
        let mut results = Vec::new();
        let mut committed_per_source = HashMap::new();

        while let Some(record) = records.next().await {
            buffer.push(record);
            if buffer.len() >= self.batch_size {
                let batch = std::mem::take(&mut buffer);
                self.flush_tracked(batch, &mut results, &mut committed_per_source)
                    .await?;
            }
        }
        if !buffer.is_empty() {
            self.flush_tracked(buffer, &mut results, &mut committed_per_source)
                .await?;
        }

        let committed = results.iter().filter(|r| r.committed).count();
        info!(
            batches = results.len(),
            committed,
            failed = results.len() - committed,
            "Partition commit finished"
        );

        Ok(results)
    }

    /// Flush `batch` and account for it in `results` and `committed_per_source`
    async fn flush_tracked(
        &self,
        batch: Vec<ExtractedRecord>,
        results: &mut Vec<BatchCommitResult>,
        committed_per_source: &mut HashMap<String, u64>,
    ) -> Result<(), WriterHalted> {
        let batch_number = results.len() as u64;
        match self.flush(batch_number, &batch).await {
            Ok(result) => {
                if result.committed {
                    for record in &batch {
                        *committed_per_source.entry(record.source_path.clone()).or_default() += 1;
                    }
                }
                results.push(result);
                Ok(())
            },
            Err((result, reason)) => {
                error!(batch = batch_number, %reason, "Sink unreachable, stopping writer");
                results.push(result);
                Err(WriterHalted {
                    reason,
                    batches: std::mem::take(results),
                    committed_per_source: std::mem::take(committed_per_source),
                })
            },
        }
    }

    /// Upsert one batch with retries
    ///
    /// The error side carries a fatal connection loss.
    async fn flush(
        &self,
        batch_number: u64,
        batch: &[ExtractedRecord],
    ) -> Result<BatchCommitResult, (BatchCommitResult, String)> {
        let mut last_error: Option<SinkError> = None;
        let mut attempts = 0;

        for attempt in 1..=self.retry_ceiling {
            attempts = attempt;
            match self.upsert(batch).await {
                Ok(()) => {
                    debug!(batch = batch_number, records = batch.len(), attempt, "Batch committed");
                    return Ok(BatchCommitResult {
                        partition: self.partition,
                        batch_number,
                        batch_size: batch.len(),
                        committed: true,
                        attempt_count: attempt,
                        error_detail: None,
                    });
                },
                Err(e) => {
                    if attempt < self.retry_ceiling {
                        let delay = self.backoff_for(attempt);
                        warn!(
                            batch = batch_number,
                            attempt,
                            max_attempts = self.retry_ceiling,
                            error = %e,
                            "Batch commit failed, retrying in {:?}",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                },
            }
        }

        let detail = last_error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "commit failed".to_string());
        let result = BatchCommitResult {
            partition: self.partition,
            batch_number,
            batch_size: batch.len(),
            committed: false,
            attempt_count: attempts,
            error_detail: Some(detail.clone()),
        };

        if last_error.as_ref().is_some_and(SinkError::is_connection_lost) {
            if let Err(probe) = self.sink.check_connection().await {
                return Err((result, probe.to_string()));
            }
        }

        warn!(
            batch = batch_number,
            records = batch.len(),
            attempts,
            error = %detail,
            "Batch not committed after retry ceiling"
        );
        Ok(result)
    }

    async fn upsert(&self, batch: &[ExtractedRecord]) -> Result<(), SinkError> {
        let _permit = match &self.commit_permit {
            Some(permit) => Some(
                permit
                    .acquire()
                    .await
                    .map_err(|_| SinkError::Transient("commit permit closed".to_string()))?,
            ),
            None => None,
        };
        self.sink.upsert_batch(batch).await
    }

    /// `backoff * 2^(attempt - 1)`
    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor)
    }
}
