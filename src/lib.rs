//! Bulk ingestion of OpenAQ v3 air-quality data into parquet files.
//!
//! For each configured country the ingestor pages through its locations,
//! extracts their sensors and then pulls every sensor's measurements for the
//! configured window. Nested API records are flattened into columnar rows,
//! buffered, and flushed to compressed parquet files in batches. Every run
//! ends with a JSON summary next to the data.
//!
//! ```no_run
//! use openaq_ingest::{IngestConfig, Ingestor, IngestError};
//!
//! # async fn run() -> Result<(), IngestError> {
//! let config = IngestConfig::builder()
//!     .api_key("my-api-key")
//!     .output_dir("data/full_data")
//!     .max_sensors(20)
//!     .build();
//! let summary = Ingestor::new(config)?.run().await?;
//! println!("{} measurements, status {}", summary.totals.measurements, summary.status);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
mod error;
pub mod flatten;
pub mod http;
pub mod ingest;
pub mod paginate;
mod utils;

#[cfg(test)]
mod testing;

pub use error::IngestError;
pub use utils::{ensure_output_dir_exists, run_stamp};

pub use batch::buffer::{BatchBuffer, FlushReport};
pub use batch::error::FlushError;
pub use batch::RecordKind;
pub use config::error::ConfigError;
pub use config::file::ConfigFile;
pub use config::{Compression, IngestConfig, Target};
pub use flatten::record::{FlatRecord, Scalar};
pub use http::client::{ApiClient, ApiResponse, OpenAqClient, QueryParams};
pub use http::error::{FetchError, FetchErrorKind};
pub use http::retry::{Fetcher, RetryPolicy};
pub use ingest::summary::{RunStatus, RunSummary};
pub use ingest::{Ingestor, RunPhase};
pub use paginate::{Coverage, Paginated, Paginator};
