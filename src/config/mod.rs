//! Run configuration.
//!
//! [`IngestConfig`] is built with a `bon` builder where every tunable has the
//! production default; [`file::ConfigFile`] is the optional TOML layer on top.

pub mod error;
pub mod file;

use crate::config::error::ConfigError;
use crate::http::client::DEFAULT_BASE_URL;
use crate::http::retry::RetryPolicy;
use crate::paginate::DEFAULT_PAGE_SIZE;
use bon::Builder;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATE_FROM: &str = "2024-01-01T00:00:00Z";
pub const DEFAULT_OUTPUT_DIR: &str = "data/full_data";
pub const DEFAULT_BATCH_SIZE: usize = 75_000;

/// A country scope to ingest, e.g. `Nepal=145`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub id: u32,
}

impl Target {
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

impl FromStr for Target {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidTarget {
            value: s.to_string(),
            reason: reason.to_string(),
        };
        let (name, id) = s.split_once('=').ok_or_else(|| invalid("expected NAME=ID"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        let id = id
            .trim()
            .parse::<u32>()
            .map_err(|_| invalid("id is not a positive integer"))?;
        Ok(Target::new(name, id))
    }
}

pub fn default_targets() -> Vec<Target> {
    vec![
        Target::new("Nepal", 145),
        Target::new("India", 9),
        Target::new("China", 10),
    ]
}

/// Parquet codec for flushed batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Snappy,
    Gzip,
    Brotli,
    Zstd,
    Uncompressed,
}

impl Compression {
    pub fn to_parquet(self) -> ParquetCompression {
        match self {
            Compression::Snappy => ParquetCompression::Snappy,
            Compression::Gzip => ParquetCompression::Gzip(None),
            Compression::Brotli => ParquetCompression::Brotli(None),
            Compression::Zstd => ParquetCompression::Zstd(None),
            Compression::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

/// Accepts RFC 3339 (`2024-01-01T00:00:00Z`) or a bare date, read as midnight UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ConfigError> {
    let value = value.trim();
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or(ConfigError::InvalidTimestamp {
                value: value.to_string(),
                source: rfc_err,
            }),
    }
}

/// Formats a timestamp the way the measurements endpoint expects it.
pub fn api_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn default_date_from() -> DateTime<Utc> {
    parse_timestamp(DEFAULT_DATE_FROM).unwrap_or(DateTime::UNIX_EPOCH)
}

#[derive(Debug, Clone, Builder)]
pub struct IngestConfig {
    #[builder(into)]
    pub api_key: String,
    #[builder(into, default = DEFAULT_BASE_URL.to_string())]
    pub base_url: String,
    #[builder(default = default_targets())]
    pub targets: Vec<Target>,
    #[builder(into, default = PathBuf::from(DEFAULT_OUTPUT_DIR))]
    pub output_dir: PathBuf,

    #[builder(default = default_date_from())]
    pub date_from: DateTime<Utc>,
    /// `None` means "now" at the start of the run.
    pub date_to: Option<DateTime<Utc>>,

    #[builder(default = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,
    /// Records per parquet file.
    #[builder(default = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    #[builder(default = 3)]
    pub max_workers: usize,
    /// Sensors handed to the worker pool at a time.
    #[builder(default = 50)]
    pub sensor_batch_size: usize,
    /// Stop after this many sensors. Handy for smoke runs.
    pub max_sensors: Option<usize>,
    #[builder(default = true)]
    pub include_mobile: bool,
    #[builder(default = true)]
    pub include_monitor: bool,

    #[builder(default = Duration::from_millis(300))]
    pub request_delay: Duration,
    #[builder(default = 3)]
    pub max_retries: u32,
    #[builder(default = Duration::from_secs(30))]
    pub timeout: Duration,
    #[builder(default = Duration::from_secs(60))]
    pub rate_limit_wait: Duration,
    #[builder(default = Duration::from_secs(1))]
    pub backoff_base: Duration,

    #[builder(default = 10)]
    pub progress_interval: usize,
    #[builder(default = 3)]
    pub max_flush_failures: u32,
    #[builder(default)]
    pub compression: Compression,
}

impl IngestConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            rate_limit_wait: self.rate_limit_wait,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.targets.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "targets",
                reason: "at least one target is required".to_string(),
            });
        }

        let positive = [
            ("page_size", self.page_size),
            ("batch_size", self.batch_size),
            ("max_workers", self.max_workers),
            ("sensor_batch_size", self.sensor_batch_size),
            ("progress_interval", self.progress_interval),
            ("max_flush_failures", self.max_flush_failures as usize),
        ];
        if let Some(&(field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidValue {
                field,
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_sensors == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_sensors",
                reason: "must be greater than zero when set".to_string(),
            });
        }

        if let Some(date_to) = self.date_to {
            if date_to <= self.date_from {
                return Err(ConfigError::InvalidValue {
                    field: "date_to",
                    reason: format!(
                        "{} is not after date_from {}",
                        api_timestamp(&date_to),
                        api_timestamp(&self.date_from)
                    ),
                });
            }
        }
        Ok(())
    }
}
