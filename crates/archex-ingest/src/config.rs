//! Pipeline configuration
//!
//! Recognized options, each overridable from the environment (`ARCHEX_*`),
//! from a TOML file, or from command-line flags.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Cap applied to the automatic partition count
pub const DEFAULT_AUTO_PARTITION_UPPER_BOUND: usize = 100;

/// Records per sink commit
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Files larger than this are extracted in bounded chunks (500 MiB)
pub const DEFAULT_LARGE_FILE_THRESHOLD_BYTES: u64 = 500 * 1024 * 1024;

/// Records requested per chunk when extracting a large file
pub const DEFAULT_LARGE_FILE_CHUNK_RECORDS: usize = 5000;

/// Attempts per batch before it is marked uncommitted
pub const DEFAULT_COMMIT_RETRY_CEILING: u32 = 3;

/// Base commit backoff, doubled after every failed attempt
pub const DEFAULT_COMMIT_RETRY_BACKOFF_MS: u64 = 1000;

/// Bounded hand-off between a worker and its writer
pub const DEFAULT_RECORD_CHANNEL_CAPACITY: usize = 1024;

/// Requested number of partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionCount {
    /// `min(units, upper bound)`
    #[default]
    Auto,
    /// Explicit count, clamped to `[1, units]` at planning time
    Fixed(usize),
}

impl FromStr for PartitionCount {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return Ok(PartitionCount::Auto);
        }
        trimmed
            .parse::<usize>()
            .map(PartitionCount::Fixed)
            .map_err(|_| {
                IngestError::config(format!(
                    "Invalid partition count '{}': expected 'auto' or a non-negative integer",
                    s
                ))
            })
    }
}

impl std::fmt::Display for PartitionCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionCount::Auto => f.write_str("auto"),
            PartitionCount::Fixed(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for PartitionCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PartitionCount::Auto => serializer.serialize_str("auto"),
            PartitionCount::Fixed(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for PartitionCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(usize),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(PartitionCount::Fixed(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// How task units are assigned to partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Round-robin by index over the size-sorted list; balances unit counts
    #[default]
    RoundRobin,
    /// Greedy assignment to the lightest partition; balances total bytes
    SizeBalanced,
}

impl FromStr for PartitionStrategy {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(PartitionStrategy::RoundRobin),
            "size_balanced" => Ok(PartitionStrategy::SizeBalanced),
            _ => Err(IngestError::config(format!(
                "Invalid partition strategy '{}': expected 'round_robin' or 'size_balanced'",
                s
            ))),
        }
    }
}

/// Main pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of partitions, or `auto`
    pub partition_count: PartitionCount,
    /// Cap for the automatic partition count
    pub auto_partition_upper_bound: usize,
    pub partition_strategy: PartitionStrategy,
    /// Records per sink commit
    pub batch_size: usize,
    /// `false` forces a single partition holding every unit
    pub parallel_enabled: bool,
    /// Concurrent workers; 0 means one per partition
    pub max_workers: usize,
    pub large_file_threshold_bytes: u64,
    pub large_file_chunk_records: usize,
    /// Attempts per batch, including the first
    pub commit_retry_ceiling: u32,
    pub commit_retry_backoff_ms: u64,
    pub record_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            partition_count: PartitionCount::Auto,
            auto_partition_upper_bound: DEFAULT_AUTO_PARTITION_UPPER_BOUND,
            partition_strategy: PartitionStrategy::RoundRobin,
            batch_size: DEFAULT_BATCH_SIZE,
            parallel_enabled: true,
            max_workers: 0,
            large_file_threshold_bytes: DEFAULT_LARGE_FILE_THRESHOLD_BYTES,
            large_file_chunk_records: DEFAULT_LARGE_FILE_CHUNK_RECORDS,
            commit_retry_ceiling: DEFAULT_COMMIT_RETRY_CEILING,
            commit_retry_backoff_ms: DEFAULT_COMMIT_RETRY_BACKOFF_MS,
            record_channel_capacity: DEFAULT_RECORD_CHANNEL_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables on top of defaults
    ///
    /// Environment variables:
    /// - `ARCHEX_PARTITION_COUNT`: `auto` or an integer
    /// - `ARCHEX_AUTO_PARTITION_UPPER_BOUND`
    /// - `ARCHEX_PARTITION_STRATEGY`: `round_robin` or `size_balanced`
    /// - `ARCHEX_BATCH_SIZE`
    /// - `ARCHEX_PARALLEL_ENABLED`: true/false
    /// - `ARCHEX_MAX_WORKERS`
    /// - `ARCHEX_LARGE_FILE_THRESHOLD_BYTES`
    /// - `ARCHEX_LARGE_FILE_CHUNK_RECORDS`
    /// - `ARCHEX_COMMIT_RETRY_CEILING`
    /// - `ARCHEX_COMMIT_RETRY_BACKOFF_MS`
    /// - `ARCHEX_RECORD_CHANNEL_CAPACITY`
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents).map_err(|e| {
            IngestError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `ARCHEX_*` environment variables; malformed values are errors
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(v) = env_parse("ARCHEX_PARTITION_COUNT")? {
            self.partition_count = v;
        }
        if let Some(v) = env_parse("ARCHEX_AUTO_PARTITION_UPPER_BOUND")? {
            self.auto_partition_upper_bound = v;
        }
        if let Some(v) = env_parse("ARCHEX_PARTITION_STRATEGY")? {
            self.partition_strategy = v;
        }
        if let Some(v) = env_parse("ARCHEX_BATCH_SIZE")? {
            self.batch_size = v;
        }
        if let Some(v) = env_parse("ARCHEX_PARALLEL_ENABLED")? {
            self.parallel_enabled = v;
        }
        if let Some(v) = env_parse("ARCHEX_MAX_WORKERS")? {
            self.max_workers = v;
        }
        if let Some(v) = env_parse("ARCHEX_LARGE_FILE_THRESHOLD_BYTES")? {
            self.large_file_threshold_bytes = v;
        }
        if let Some(v) = env_parse("ARCHEX_LARGE_FILE_CHUNK_RECORDS")? {
            self.large_file_chunk_records = v;
        }
        if let Some(v) = env_parse("ARCHEX_COMMIT_RETRY_CEILING")? {
            self.commit_retry_ceiling = v;
        }
        if let Some(v) = env_parse("ARCHEX_COMMIT_RETRY_BACKOFF_MS")? {
            self.commit_retry_backoff_ms = v;
        }
        if let Some(v) = env_parse("ARCHEX_RECORD_CHANNEL_CAPACITY")? {
            self.record_channel_capacity = v;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IngestError::config("batch_size must be greater than 0"));
        }
        if self.large_file_chunk_records == 0 {
            return Err(IngestError::config(
                "large_file_chunk_records must be greater than 0",
            ));
        }
        if self.commit_retry_ceiling == 0 {
            return Err(IngestError::config(
                "commit_retry_ceiling must be at least 1 (the first attempt counts)",
            ));
        }
        if self.auto_partition_upper_bound == 0 {
            return Err(IngestError::config(
                "auto_partition_upper_bound must be greater than 0",
            ));
        }
        if self.record_channel_capacity == 0 {
            return Err(IngestError::config(
                "record_channel_capacity must be greater than 0",
            ));
        }
        if self.record_channel_capacity > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(IngestError::config(format!(
                "record_channel_capacity must not exceed {}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }

    /// Partition count after applying `parallel_enabled`
    pub fn effective_partition_count(&self) -> PartitionCount {
        if self.parallel_enabled {
            self.partition_count
        } else {
            PartitionCount::Fixed(1)
        }
    }

    /// Base delay between commit attempts
    pub fn commit_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.commit_retry_backoff_ms)
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| IngestError::config(format!("Invalid {}='{}': {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
