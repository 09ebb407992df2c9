use crate::batch::RecordKind;
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("Failed to create output directory '{0}'")]
    OutputDir(PathBuf, #[source] std::io::Error),

    #[error("Failed to assemble DataFrame for {kind} batch")]
    DataFrame {
        kind: RecordKind,
        #[source]
        source: PolarsError,
    },

    // Raised by write_parquet on the blocking pool.
    #[error("I/O error writing parquet batch '{0}'")]
    ParquetWriteIo(PathBuf, #[source] std::io::Error),
    #[error("Encoding error writing parquet batch '{0}'")]
    ParquetWritePolars(PathBuf, #[source] PolarsError),

    #[error("Background flush task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
