//! Logging setup for archex binaries
//!
//! Logs go to stderr, optionally mirrored into daily-rotated files, as text or
//! JSON. `RUST_LOG` is honoured on top of the configured level.
//!
//! ```no_run
//! use archex_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::new("archex-ingest").verbose(true).merge_env()?;
//!     let _guard = init_logging(&config)?;
//!
//!     tracing::info!(partitions = 4, "Starting run");
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// When set, logs are also written to daily files in this directory
    pub log_dir: Option<PathBuf>,
    /// File name prefix, e.g. "archex-ingest" -> "archex-ingest.2026-10-18"
    pub file_prefix: String,
    /// Extra directives such as "sqlx=warn"
    pub filter: Option<String>,
}

impl LogConfig {
    pub fn new(file_prefix: impl Into<String>) -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            log_dir: None,
            file_prefix: file_prefix.into(),
            filter: None,
        }
    }

    /// Debug level when `verbose`, info otherwise
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.level = if verbose { Level::DEBUG } else { Level::INFO };
        self
    }

    /// Overlay `ARCHEX_LOG_LEVEL`, `ARCHEX_LOG_FORMAT`, `ARCHEX_LOG_DIR` and
    /// `ARCHEX_LOG_FILTER`
    pub fn merge_env(mut self) -> Result<Self> {
        if let Ok(level) = std::env::var("ARCHEX_LOG_LEVEL") {
            self.level = level
                .parse()
                .with_context(|| format!("Invalid ARCHEX_LOG_LEVEL '{}'", level))?;
        }
        if let Ok(format) = std::env::var("ARCHEX_LOG_FORMAT") {
            self.format = format.parse()?;
        }
        if let Ok(dir) = std::env::var("ARCHEX_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Ok(filter) = std::env::var("ARCHEX_LOG_FILTER") {
            self.filter = Some(filter);
        }
        Ok(self)
    }

    fn build_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());

        for directive in self.filter.iter().flat_map(|f| f.split(',')) {
            let directive = directive.trim();
            if directive.is_empty() {
                continue;
            }
            filter = filter.add_directive(
                directive
                    .parse()
                    .with_context(|| format!("Failed to parse filter directive '{}'", directive))?,
            );
        }

        Ok(filter)
    }
}

/// Install the global subscriber
///
/// Keep the returned guard alive until exit when file output is enabled, or
/// buffered lines are lost.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = config.build_filter()?;
    // stderr keeps the report printed on stdout machine-readable
    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(config.format, std::io::stderr, true)];
    let mut guard = None;

    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir).context("Failed to create log directory")?;
        let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt_layer(config.format, writer, false));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_span_events(FmtSpan::CLOSE);

    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}
