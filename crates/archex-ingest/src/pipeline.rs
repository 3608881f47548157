//! End-to-end ingestion pipeline
//!
//! Enumerate the task units, then hand them to the coordinator:
//! 1. Enumeration (fatal on failure, nothing dispatched)
//! 2. Partitioned extraction and batched commit
//! 3. Run report

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::PipelineConfig;
use crate::discovery::TaskSource;
use crate::error::Result;
use crate::framework::{ArchiveParser, RecordSink, RunCoordinator, RunReport};

/// Archive ingestion pipeline
pub struct IngestPipeline {
    source: Arc<dyn TaskSource>,
    coordinator: RunCoordinator,
}

impl IngestPipeline {
    pub fn new(
        source: Arc<dyn TaskSource>,
        parser: Arc<dyn ArchiveParser>,
        sink: Arc<dyn RecordSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            coordinator: RunCoordinator::new(parser, sink, config),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.coordinator = self.coordinator.with_cancellation(cancel);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.coordinator.cancellation_token()
    }

    /// Enumerate and process every archive
    pub async fn run(&self) -> Result<RunReport> {
        let units = self.source.enumerate().await?;
        info!(units = units.len(), "Starting ingestion");
        self.coordinator.run(units).await
    }
}
