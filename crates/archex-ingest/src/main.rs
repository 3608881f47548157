//! Archex Ingest - archive extraction tool

use anyhow::{Context, Result};
use archex_common::logging::{init_logging, LogConfig};
use archex_ingest::discovery::TaskSource;
use archex_ingest::framework::{PartitionPlanner, RecordSink, RunReport};
use archex_ingest::{
    FsTaskSource, IngestError, IngestPipeline, MboxParser, MemorySink, PartitionCount,
    PipelineConfig, SqliteSink,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "archex-ingest")]
#[command(author, version, about = "Partitioned parallel archive extraction")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract every MBOX mailbox (.mbox, .mbx) under a directory and commit the records
    Run {
        #[command(flatten)]
        input: InputArgs,

        /// Sink database URL
        #[arg(long, env = "ARCHEX_DATABASE_URL", default_value = "sqlite://archex.db")]
        database: String,

        /// Commit to an in-memory sink instead of the database
        #[arg(long)]
        dry_run: bool,

        /// Records per commit
        #[arg(long)]
        batch_size: Option<usize>,

        /// Process every file in a single partition
        #[arg(long)]
        sequential: bool,

        /// Write the JSON run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the partition plan without processing anything
    Plan {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Directory to search for mailboxes
    #[arg(short, long)]
    root: PathBuf,

    /// Number of partitions, or "auto"
    #[arg(short, long)]
    partitions: Option<PartitionCount>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl InputArgs {
    /// File, then environment, then flags
    fn load_config(&self) -> Result<PipelineConfig> {
        let base = match &self.config {
            Some(path) => PipelineConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        let mut config = base.merge_env().context("Invalid ARCHEX_* environment")?;
        if let Some(partitions) = self.partitions {
            config.partition_count = partitions;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::new("archex-ingest")
        .verbose(cli.verbose)
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run {
            input,
            database,
            dry_run,
            batch_size,
            sequential,
            report,
        } => {
            let mut config = input.load_config()?;
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if sequential {
                config.parallel_enabled = false;
            }
            config.validate()?;

            let sink: Arc<dyn RecordSink> = if dry_run {
                info!("Dry run: records go to an in-memory sink");
                Arc::new(MemorySink::new())
            } else {
                Arc::new(
                    SqliteSink::connect(&database)
                        .await
                        .with_context(|| format!("Failed to open sink {}", database))?,
                )
            };

            run(&input.root, sink, config, report.as_deref()).await
        },
        Command::Plan { input } => plan(&input).await,
    }
}

async fn run(
    root: &Path,
    sink: Arc<dyn RecordSink>,
    config: PipelineConfig,
    report_path: Option<&Path>,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let parser = MboxParser::new();
    let pipeline = IngestPipeline::new(
        Arc::new(FsTaskSource::for_parser(root, &parser)),
        Arc::new(parser),
        sink.clone(),
        config,
    )
    .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight files");
            cancel.cancel();
        }
    });

    match pipeline.run().await {
        Ok(report) => {
            println!("{}", report.summary());
            if let Some(path) = report_path {
                write_report(&report, path)?;
            }
            match sink.record_count().await {
                Ok(count) => info!(sink = %sink.describe(), records = count, "Sink record count"),
                Err(e) => warn!(error = %e, "Could not read sink record count"),
            }
            Ok(())
        },
        Err(err) => {
            if let (Some(partial), Some(path)) = (err.partial_report(), report_path) {
                write_report(partial, path)?;
            }
            if let IngestError::SinkUnavailable { partial, .. } = &err {
                println!("{}", partial.summary());
            }
            error!(error = %err, "Run aborted");
            Err(err.into())
        },
    }
}

async fn plan(input: &InputArgs) -> Result<()> {
    let config = input.load_config()?;
    let units = FsTaskSource::for_parser(&input.root, &MboxParser::new())
        .enumerate()
        .await?;
    let partitions = PartitionPlanner::from_config(&config).plan(units);

    println!("{} partitions", partitions.len());
    for partition in &partitions {
        println!(
            "  partition {:>3}: {:>5} files, {:>14} bytes",
            partition.index,
            partition.len(),
            partition.total_bytes()
        );
    }
    Ok(())
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = report.to_json().context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    info!(path = %path.display(), "Run report written");
    Ok(())
}
