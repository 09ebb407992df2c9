use crate::config::error::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Output path exists but is not a directory: '{0}'")]
    OutputDirNotADirectory(PathBuf),

    #[error("Failed to create output directory '{0}'")]
    OutputDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),

    #[error("Failed to encode run summary")]
    SummaryEncode(#[source] serde_json::Error),

    #[error("Failed to write run summary '{0}'")]
    SummaryWrite(PathBuf, #[source] std::io::Error),

    #[error("Failed to open log file '{0}'")]
    LogFile(PathBuf, #[source] std::io::Error),
}
