//! SQLite sink
//!
//! One row per record, keyed by `record_id`. Each batch is written inside a
//! single transaction and conflicting identifiers are overwritten, so a
//! retried batch never produces duplicate rows.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::framework::sink::RecordSink;
use crate::framework::types::ExtractedRecord;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS extracted_records (
    record_id TEXT PRIMARY KEY,
    source_path TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    content_md5 TEXT NOT NULL,
    payload TEXT NOT NULL,
    committed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_extracted_records_source
    ON extracted_records(source_path, sequence);
"#;

const UPSERT: &str = r#"
INSERT INTO extracted_records (record_id, source_path, sequence, content_md5, payload, committed_at)
VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
ON CONFLICT(record_id) DO UPDATE SET
    source_path = excluded.source_path,
    sequence = excluded.sequence,
    content_md5 = excluded.content_md5,
    payload = excluded.payload,
    committed_at = excluded.committed_at
"#;

/// SQLite-backed record sink
pub struct SqliteSink {
    pool: SqlitePool,
    url: String,
}

impl SqliteSink {
    /// Connect to `url` (e.g. `sqlite://archive.db` or `sqlite::memory:`) and create the schema
    pub async fn connect(url: &str) -> Result<Self, SinkError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SinkError::ConnectionLost(format!("Invalid database URL '{}': {}", url, e)))?
            .create_if_missing(true);

        // One connection: SQLite takes a single writer, and an in-memory
        // database lives only as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(classify)?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(classify)?;

        info!(url, "Connected to SQLite sink");

        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    /// Close the pool; later calls report a lost connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Number of stored records from one source file
    pub async fn count_for_source(&self, source_path: &str) -> Result<u64, SinkError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM extracted_records WHERE source_path = ?1
            "#,
        )
        .bind(source_path)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        let count: i64 = row.get("count");
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn check_connection(&self) -> Result<(), SinkError> {
        if self.pool.is_closed() {
            return Err(SinkError::ConnectionLost("pool closed".to_string()));
        }
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn upsert_batch(&self, records: &[ExtractedRecord]) -> Result<(), SinkError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        for record in records {
            let payload = serde_json::to_string(&record.payload)
                .map_err(|e| SinkError::Transient(format!("Payload encoding failed: {}", e)))?;
            let sequence = i64::try_from(record.sequence).unwrap_or(i64::MAX);

            sqlx::query(UPSERT)
                .bind(&record.record_id)
                .bind(&record.source_path)
                .bind(sequence)
                .bind(&record.content_md5)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        debug!(records = records.len(), "SQLite batch committed");
        Ok(())
    }

    async fn record_count(&self) -> Result<u64, SinkError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM extracted_records")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;

        let count: i64 = row.get("count");
        Ok(count.max(0) as u64)
    }

    fn supports_concurrent_writers(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("sqlite ({})", self.url)
    }
}

/// Map driver errors onto the sink taxonomy
fn classify(err: sqlx::Error) -> SinkError {
    let connection_lost = matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_)
    );
    if connection_lost {
        SinkError::ConnectionLost(err.to_string())
    } else {
        SinkError::Transient(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use archex_common::checksum::{content_md5, record_identifier};
    use serde_json::json;

    fn record(path: &str, sequence: u64, subject: &str) -> ExtractedRecord {
        let payload = json!({"subject": subject});
        let digest = content_md5(&payload).unwrap();
        ExtractedRecord {
            record_id: record_identifier(path, sequence, &digest),
            source_path: path.to_string(),
            sequence,
            content_md5: digest,
            payload,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let sink = SqliteSink::connect("sqlite::memory:").await.unwrap();
        let batch: Vec<ExtractedRecord> = (0..5).map(|i| record("a.mbox", i, "hello")).collect();

        sink.upsert_batch(&batch).await.unwrap();
        sink.upsert_batch(&batch).await.unwrap();

        assert_eq!(sink.record_count().await.unwrap(), 5);
        assert_eq!(sink.count_for_source("a.mbox").await.unwrap(), 5);
        assert_eq!(sink.count_for_source("b.mbox").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_database_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("records.db").display());

        {
            let sink = SqliteSink::connect(&url).await.unwrap();
            sink.upsert_batch(&[record("a.mbox", 0, "one"), record("a.mbox", 1, "two")])
                .await
                .unwrap();
            sink.close().await;
        }

        let sink = SqliteSink::connect(&url).await.unwrap();
        assert_eq!(sink.record_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_reports_connection_lost() {
        let sink = SqliteSink::connect("sqlite::memory:").await.unwrap();
        sink.close().await;

        let err = sink.check_connection().await.unwrap_err();
        assert!(err.is_connection_lost());

        let err = sink.upsert_batch(&[record("a.mbox", 0, "x")]).await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_sink_is_single_writer() {
        let sink = SqliteSink::connect("sqlite::memory:").await.unwrap();
        assert!(!sink.supports_concurrent_writers());
        assert!(sink.describe().starts_with("sqlite"));
    }
}
