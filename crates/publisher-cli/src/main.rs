//! Publish an H.264 Annex-B elementary stream into an FLV file.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use publisher_engine::{FileSource, PipelineConfig, Publisher};
use publisher_transport::FlvFileSession;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Read an Annex-B H.264 file and publish it through the RTMP packet
/// pipeline into an FLV file.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Annex-B H.264 input file
    #[arg(short, long)]
    input: PathBuf,

    /// FLV output file
    #[arg(short, long)]
    output: PathBuf,

    /// JSON pipeline configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bytes read per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// NAL unit queue capacity
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Read the input as fast as possible
    #[arg(long)]
    no_pacing: bool,
}

impl Args {
    /// Config file values, overridden by flags given on the command line.
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(queue_capacity) = self.queue_capacity {
            config.queue_capacity = queue_capacity;
        }
        if self.no_pacing {
            config.chunk_interval_ms = 0;
        }
        Ok(config)
    }
}

/// Initialize logging.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "avc_publish=info,publisher_engine=info,publisher_media=info,publisher_transport=info,publisher_collections=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = args.pipeline_config()?;

    let publisher = Publisher::new(config).context("Invalid pipeline configuration")?;
    let source = FileSource::open(&args.input, publisher.config())
        .with_context(|| format!("Failed to open input {}", args.input.display()))?;
    let output = File::create(&args.output)
        .with_context(|| format!("Failed to create output {}", args.output.display()))?;
    let mut session = FlvFileSession::new(BufWriter::new(output));

    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        "Publishing"
    );
    let report = publisher
        .run(source, &mut session)
        .context("Publishing failed")?;

    let stats = session.stats();
    session
        .into_inner()
        .context("Failed to finish output file")?;

    info!(
        reason = report.stop_reason.name(),
        packets = report.packets_sent,
        evicted = report.units_evicted,
        discarded = report.units_discarded,
        bytes_written = stats.bytes_sent,
        "Done"
    );
    Ok(())
}
