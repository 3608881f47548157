//! Persistent sink interface
//!
//! Sinks accept batches keyed by the deterministic record identifier and must
//! treat an already-present identifier as an overwrite, never a second row.
//! The batch writer's retry policy depends on that contract.

use async_trait::async_trait;

use super::types::ExtractedRecord;
use crate::error::SinkError;

/// Destination for extracted records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Probe connectivity; an error here means the sink is unusable
    async fn check_connection(&self) -> Result<(), SinkError>;

    /// Atomically upsert one batch keyed by `record_id`
    async fn upsert_batch(&self, records: &[ExtractedRecord]) -> Result<(), SinkError>;

    /// Number of distinct records held
    async fn record_count(&self) -> Result<u64, SinkError>;

    /// Whether several writers may commit at the same time
    ///
    /// When false, writers serialize their commits through one permit.
    fn supports_concurrent_writers(&self) -> bool {
        true
    }

    /// Short description for logs
    fn describe(&self) -> String;
}
