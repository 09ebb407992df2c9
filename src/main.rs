use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use openaq_ingest::{
    ensure_output_dir_exists, run_stamp, ConfigFile, IngestError, Ingestor, RunStatus, Target,
};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "openaq_ingest",
    about = "Bulk OpenAQ air-quality ingestion into parquet files"
)]
struct Cli {
    /// TOML config file. Flags given on the command line take precedence.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, env = "OPENAQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Country to ingest, repeatable (default: Nepal=145, India=9, China=10)
    #[arg(long = "target", value_name = "NAME=ID")]
    targets: Vec<Target>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Start of the measurement window (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    date_from: Option<String>,
    /// End of the measurement window, defaults to the start of the run
    #[arg(long)]
    date_to: Option<String>,
    /// Only collect measurements for the first N sensors
    #[arg(long)]
    max_sensors: Option<usize>,
    #[arg(long)]
    workers: Option<usize>,
    /// Records per parquet file
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> ConfigFile {
        ConfigFile {
            api_key: self.api_key.clone(),
            targets: (!self.targets.is_empty()).then(|| self.targets.clone()),
            output_dir: self.output_dir.clone(),
            date_from: self.date_from.clone(),
            date_to: self.date_to.clone(),
            max_sensors: self.max_sensors,
            max_workers: self.workers,
            batch_size: self.batch_size,
            ..ConfigFile::default()
        }
    }
}

/// Sends every log line to stderr and the run's log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(filters: &str, log_path: &Path) -> Result<(), IngestError> {
    let file =
        File::create(log_path).map_err(|e| IngestError::LogFile(log_path.to_path_buf(), e))?;
    env_logger::Builder::new()
        .parse_filters(filters)
        .format_timestamp_secs()
        .target(env_logger::Target::Pipe(Box::new(Tee { file })))
        .init();
    Ok(())
}

async fn run(cli: Cli) -> Result<RunStatus, IngestError> {
    let file = match &cli.config {
        Some(path) => ConfigFile::load(path).await?,
        None => ConfigFile::default(),
    };
    let config = file.merge(cli.overrides()).into_config()?;

    let started_at = Utc::now();
    ensure_output_dir_exists(&config.output_dir).await?;
    let log_path = config
        .output_dir
        .join(format!("ingestion_{}.log", run_stamp(&started_at)));
    init_logging(&cli.log_level, &log_path)?;
    info!("Logging to {}", log_path.display());

    let ingestor = Ingestor::new(config)?;
    let token = ingestor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing up and writing the summary");
            token.cancel();
        }
    });

    let summary = ingestor.run_at(started_at).await?;
    Ok(summary.status)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(RunStatus::Aborted) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
