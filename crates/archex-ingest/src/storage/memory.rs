//! In-memory sink
//!
//! Used for dry runs and tests. Records are keyed by `record_id`, so
//! recommitting a batch overwrites instead of duplicating.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::SinkError;
use crate::framework::sink::RecordSink;
use crate::framework::types::ExtractedRecord;

#[derive(Debug, Default)]
pub struct MemorySink {
    records: RwLock<BTreeMap<String, ExtractedRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, record_id: &str) -> Option<ExtractedRecord> {
        self.records.read().await.get(record_id).cloned()
    }

    /// Records from one source file, in sequence order
    pub async fn records_for(&self, source_path: &str) -> Vec<ExtractedRecord> {
        let mut records: Vec<ExtractedRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.source_path == source_path)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sequence);
        records
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn check_connection(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn upsert_batch(&self, records: &[ExtractedRecord]) -> Result<(), SinkError> {
        let mut stored = self.records.write().await;
        for record in records {
            stored.insert(record.record_id.clone(), record.clone());
        }
        Ok(())
    }

    async fn record_count(&self) -> Result<u64, SinkError> {
        Ok(self.records.read().await.len() as u64)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, path: &str, sequence: u64) -> ExtractedRecord {
        ExtractedRecord {
            record_id: id.to_string(),
            source_path: path.to_string(),
            sequence,
            content_md5: String::new(),
            payload: json!({"seq": sequence}),
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_existing_identifier() {
        let sink = MemorySink::new();
        let batch = vec![record("a", "x.mbox", 0), record("b", "x.mbox", 1)];

        sink.upsert_batch(&batch).await.unwrap();
        sink.upsert_batch(&batch).await.unwrap();

        assert_eq!(sink.record_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_records_for_returns_sequence_order() {
        let sink = MemorySink::new();
        sink.upsert_batch(&[record("z", "x.mbox", 1), record("a", "x.mbox", 0), record("m", "y.mbox", 0)])
            .await
            .unwrap();

        let records = sink.records_for("x.mbox").await;
        assert_eq!(records.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![0, 1]);
        assert!(sink.get("m").await.is_some());
    }
}
