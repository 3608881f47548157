//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use archex_ingest::framework::{ArchiveParser, ExtractedRecord, RawEntry, RecordReader, RecordSink, TaskUnit};
use archex_ingest::{MemorySink, ParseError, PipelineConfig, SinkError};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the scripted parser does for one path
#[derive(Debug, Clone)]
pub enum FileScript {
    /// `n` well-formed records
    Records(usize),
    /// Records with defects at the given positions (positions count every entry)
    WithDefects { records: usize, defects: Vec<usize> },
    /// The file cannot be opened
    Corrupt(String),
    /// The read fails once `after` entries have been returned
    FailAfter { after: usize, message: String },
}

/// Parser driven by a per-path script
#[derive(Default)]
pub struct ScriptedParser {
    scripts: HashMap<String, FileScript>,
    /// Every `next_chunk` limit requested, per path
    pub limits: Arc<Mutex<Vec<(String, usize)>>>,
    /// Cancel this token when the given path is opened
    cancel_on_open: Option<(String, CancellationToken)>,
}

impl ScriptedParser {
    pub fn new(scripts: impl IntoIterator<Item = (String, FileScript)>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn cancel_on_open(mut self, path: impl Into<String>, token: CancellationToken) -> Self {
        self.cancel_on_open = Some((path.into(), token));
        self
    }

    pub fn limits_for(&self, path: &str) -> Vec<usize> {
        self.limits
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, l)| *l)
            .collect()
    }
}

#[async_trait]
impl ArchiveParser for ScriptedParser {
    async fn open(&self, path: &str) -> Result<Box<dyn RecordReader>, ParseError> {
        if let Some((trigger, token)) = &self.cancel_on_open {
            if trigger == path {
                token.cancel();
            }
        }

        let script = self
            .scripts
            .get(path)
            .cloned()
            .ok_or_else(|| ParseError::Open(format!("unscripted path {}", path)))?;

        let (entries, fail_after) = match script {
            FileScript::Records(n) => (records(path, n), None),
            FileScript::WithDefects { records: n, defects } => {
                let mut entries = records(path, n);
                for position in defects {
                    entries.insert(position.min(entries.len()), RawEntry::Defect(format!("defect at {}", position)));
                }
                (entries, None)
            },
            FileScript::Corrupt(message) => return Err(ParseError::Format(message)),
            FileScript::FailAfter { after, message } => (records(path, after + 1_000), Some((after, message))),
        };

        Ok(Box::new(ScriptedReader {
            path: path.to_string(),
            entries: entries.into_iter(),
            returned: 0,
            fail_after,
            limits: self.limits.clone(),
        }))
    }

    fn format(&self) -> &str {
        "scripted"
    }
}

fn records(path: &str, n: usize) -> Vec<RawEntry> {
    (0..n)
        .map(|i| RawEntry::Record(json!({"path": path, "n": i})))
        .collect()
}

struct ScriptedReader {
    path: String,
    entries: std::vec::IntoIter<RawEntry>,
    returned: usize,
    fail_after: Option<(usize, String)>,
    limits: Arc<Mutex<Vec<(String, usize)>>>,
}

#[async_trait]
impl RecordReader for ScriptedReader {
    async fn next_chunk(&mut self, limit: usize) -> Result<Vec<RawEntry>, ParseError> {
        self.limits.lock().unwrap().push((self.path.clone(), limit));

        let mut take = limit;
        if let Some((after, message)) = &self.fail_after {
            if self.returned >= *after {
                return Err(ParseError::Read(message.clone()));
            }
            take = take.min(after - self.returned);
        }

        let chunk: Vec<RawEntry> = self.entries.by_ref().take(take).collect();
        self.returned += chunk.len();
        tokio::task::yield_now().await;
        Ok(chunk)
    }
}

/// Memory sink with injectable failures
#[derive(Default)]
pub struct FaultySink {
    pub inner: MemorySink,
    /// Fail this many upserts with a transient error
    transient_failures: AtomicU32,
    /// Once this many upserts succeeded, the connection is gone for good
    lose_connection_after: Option<u32>,
    succeeded_upserts: AtomicU32,
    connection_lost: AtomicBool,
    single_writer: bool,
    /// Simulated commit latency
    latency: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub upsert_calls: AtomicU32,
}

impl FaultySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_transiently(mut self, failures: u32) -> Self {
        self.transient_failures = AtomicU32::new(failures);
        self
    }

    pub fn losing_connection_after(mut self, upserts: u32) -> Self {
        self.lose_connection_after = Some(upserts);
        self
    }

    pub fn single_writer(mut self) -> Self {
        self.single_writer = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl RecordSink for FaultySink {
    async fn check_connection(&self) -> Result<(), SinkError> {
        if self.connection_lost.load(Ordering::SeqCst) {
            Err(SinkError::ConnectionLost("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    async fn upsert_batch(&self, records: &[ExtractedRecord]) -> Result<(), SinkError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        if self.connection_lost.load(Ordering::SeqCst) {
            return Err(SinkError::ConnectionLost("connection reset".to_string()));
        }
        if let Some(limit) = self.lose_connection_after {
            if self.succeeded_upserts.load(Ordering::SeqCst) >= limit {
                self.connection_lost.store(true, Ordering::SeqCst);
                return Err(SinkError::ConnectionLost("connection reset".to_string()));
            }
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SinkError::Transient("database is locked".to_string()));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = self.inner.upsert_batch(records).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.succeeded_upserts.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn record_count(&self) -> Result<u64, SinkError> {
        self.inner.record_count().await
    }

    fn supports_concurrent_writers(&self) -> bool {
        !self.single_writer
    }

    fn describe(&self) -> String {
        "faulty".to_string()
    }
}

/// Units named `archive-NN.pst`, each 1 KiB
pub fn units(count: usize) -> Vec<TaskUnit> {
    (0..count)
        .map(|i| TaskUnit::new(unit_path(i), 1024))
        .collect()
}

pub fn unit_path(i: usize) -> String {
    format!("/archives/archive-{:02}.pst", i)
}

/// Configuration with fast retries for tests
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        batch_size: 100,
        commit_retry_ceiling: 3,
        commit_retry_backoff_ms: 1,
        record_channel_capacity: 64,
        ..Default::default()
    }
}
