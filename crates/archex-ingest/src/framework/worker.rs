//! Extraction worker
//!
//! A worker owns one partition and walks its task units strictly in order,
//! streaming extracted records to its writer through a bounded channel.
//! Concurrency only ever happens across partitions.
//!
//! Failure handling per unit:
//! - the parser cannot open or read the file: outcome `failed`, next unit
//! - one malformed record: defect counted, next record
//! - cancellation: the current unit finishes, the rest are `skipped`

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use archex_common::checksum::{content_md5, record_identifier};

use super::parser::{ArchiveParser, RawEntry};
use super::types::{ExtractedRecord, FileOutcome, FileStatus, Partition, TaskUnit};
use crate::config::PipelineConfig;

/// Detail recorded on units never started because of cancellation
pub const SKIPPED_CANCELLED: &str = "cancelled";

/// Detail recorded on units never started because the writer stopped
pub const SKIPPED_WRITER_STOPPED: &str = "record writer stopped before processing";

/// Why the record stream stopped accepting records
#[derive(Debug)]
struct StreamClosed;

/// Worker that extracts records from the units of one partition
#[derive(Clone)]
pub struct ExtractionWorker {
    parser: Arc<dyn ArchiveParser>,
    large_file_threshold_bytes: u64,
    chunk_records: usize,
    cancel: CancellationToken,
}

impl ExtractionWorker {
    pub fn new(
        parser: Arc<dyn ArchiveParser>,
        large_file_threshold_bytes: u64,
        chunk_records: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            parser,
            large_file_threshold_bytes,
            chunk_records: chunk_records.max(1),
            cancel,
        }
    }

    pub fn from_config(
        parser: Arc<dyn ArchiveParser>,
        config: &PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(
            parser,
            config.large_file_threshold_bytes,
            config.large_file_chunk_records,
            cancel,
        )
    }

    /// Start extracting `partition` in the background
    ///
    /// Returns the lazy record stream and a handle resolving to one outcome
    /// per unit. The stream ends when the partition is done; dropping it
    /// stops the worker after the current unit.
    pub fn spawn(
        self,
        partition: Partition,
        capacity: usize,
    ) -> (ReceiverStream<ExtractedRecord>, JoinHandle<Vec<FileOutcome>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(async move { self.process(partition, tx).await });
        (ReceiverStream::new(rx), handle)
    }

    /// Extract every unit of `partition`, sending records into `records`
    #[instrument(skip_all, fields(partition = partition.index, units = partition.len()))]
    pub async fn process(
        &self,
        partition: Partition,
        records: mpsc::Sender<ExtractedRecord>,
    ) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(partition.len());
        let mut units = partition.units.into_iter();

        while let Some(unit) = units.next() {
            if self.cancel.is_cancelled() {
                info!(remaining = units.len() + 1, "Cancellation requested, skipping remaining units");
                outcomes.push(FileOutcome::skipped(unit.path, SKIPPED_CANCELLED));
                outcomes.extend(units.map(|u| FileOutcome::skipped(u.path, SKIPPED_CANCELLED)));
                break;
            }

            let outcome = self.process_unit(&unit, &records).await;
            let writer_gone = records.is_closed();
            outcomes.push(outcome);

            if writer_gone {
                warn!(remaining = units.len(), "Record writer stopped, skipping remaining units");
                outcomes.extend(units.map(|u| FileOutcome::skipped(u.path, SKIPPED_WRITER_STOPPED)));
                break;
            }
        }

        let succeeded = outcomes
            .iter()
            .filter(|o| o.status == FileStatus::Succeeded)
            .count();
        info!(
            succeeded,
            failed = outcomes.iter().filter(|o| o.status == FileStatus::Failed).count(),
            skipped = outcomes.iter().filter(|o| o.status == FileStatus::Skipped).count(),
            "Partition extraction finished"
        );

        outcomes
    }

    /// Extract one unit; never returns an error, failures become the outcome
    async fn process_unit(
        &self,
        unit: &TaskUnit,
        records: &mpsc::Sender<ExtractedRecord>,
    ) -> FileOutcome {
        let started = Instant::now();
        let chunked = unit.is_large(self.large_file_threshold_bytes);
        // Small files are read whole and only emitted once fully parsed, so a
        // file-level failure leaves nothing behind in the sink.
        let limit = if chunked { self.chunk_records } else { usize::MAX };

        debug!(path = %unit.path, size_bytes = unit.size_bytes, chunked, "Extracting archive");

        let mut reader = match self.parser.open(&unit.path).await {
            Ok(reader) => reader,
            Err(e) => {
                warn!(path = %unit.path, error = %e, "Archive could not be opened");
                return FileOutcome::failed(&unit.path, e.to_string(), started.elapsed());
            },
        };

        let mut sequence: u64 = 0;
        let mut defects: u64 = 0;
        let mut emitted: u64 = 0;
        let mut pending: Vec<ExtractedRecord> = Vec::new();

        loop {
            let entries = match reader.next_chunk(limit).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        path = %unit.path,
                        error = %e,
                        records_already_emitted = emitted,
                        "Archive extraction failed"
                    );
                    let mut outcome =
                        FileOutcome::failed(&unit.path, e.to_string(), started.elapsed());
                    outcome.record_count = emitted;
                    outcome.defect_count = defects;
                    return outcome;
                },
            };

            if entries.is_empty() {
                break;
            }

            for entry in entries {
                match entry {
                    RawEntry::Record(payload) => match build_record(&unit.path, sequence, payload) {
                        Ok(record) => {
                            pending.push(record);
                            sequence += 1;
                        },
                        Err(detail) => {
                            defects += 1;
                            warn!(path = %unit.path, sequence, %detail, "Record could not be identified");
                        },
                    },
                    RawEntry::Defect(detail) => {
                        defects += 1;
                        warn!(path = %unit.path, sequence, %detail, "Malformed record skipped");
                    },
                }
            }

            if chunked {
                match emit(records, &mut pending).await {
                    Ok(n) => emitted += n,
                    Err(StreamClosed) => {
                        return stream_closed(unit, emitted, defects, started);
                    },
                }
            }
        }

        if !chunked {
            match emit(records, &mut pending).await {
                Ok(n) => emitted += n,
                Err(StreamClosed) => return stream_closed(unit, emitted, defects, started),
            }
        }

        debug!(path = %unit.path, records = emitted, defects, "Archive extracted");
        FileOutcome::succeeded(&unit.path, emitted, defects, started.elapsed())
    }
}

fn build_record(
    path: &str,
    sequence: u64,
    payload: serde_json::Value,
) -> Result<ExtractedRecord, String> {
    let digest = content_md5(&payload).map_err(|e| e.to_string())?;
    Ok(ExtractedRecord {
        record_id: record_identifier(path, sequence, &digest),
        source_path: path.to_string(),
        sequence,
        content_md5: digest,
        payload,
    })
}

/// Hand pending records to the writer in order, blocking while it is behind
async fn emit(
    records: &mpsc::Sender<ExtractedRecord>,
    pending: &mut Vec<ExtractedRecord>,
) -> Result<u64, StreamClosed> {
    let mut sent = 0;
    for record in pending.drain(..) {
        records.send(record).await.map_err(|_| StreamClosed)?;
        sent += 1;
    }
    Ok(sent)
}

fn stream_closed(unit: &TaskUnit, emitted: u64, defects: u64, started: Instant) -> FileOutcome {
    warn!(path = %unit.path, records_already_emitted = emitted, "Record writer stopped mid-file");
    let mut outcome = FileOutcome::failed(
        &unit.path,
        "record writer stopped before the file was fully committed",
        started.elapsed(),
    );
    outcome.record_count = emitted;
    outcome.defect_count = defects;
    outcome
}
