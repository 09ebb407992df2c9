use crate::config::error::ConfigError;
use crate::config::{parse_timestamp, Compression, IngestConfig, Target};
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The on-disk TOML form of [`IngestConfig`]. Every key is optional; missing
/// keys fall back to the builder defaults.
///
/// ```toml
/// api_key = "..."
/// output_dir = "data/full_data"
/// date_from = "2024-01-01T00:00:00Z"
/// batch_size = 75000
/// compression = "snappy"
///
/// [[targets]]
/// name = "Nepal"
/// id = 145
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub targets: Option<Vec<Target>>,
    pub output_dir: Option<PathBuf>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_workers: Option<usize>,
    pub sensor_batch_size: Option<usize>,
    pub max_sensors: Option<usize>,
    pub include_mobile: Option<bool>,
    pub include_monitor: Option<bool>,
    pub request_delay_secs: Option<f64>,
    pub max_retries: Option<u32>,
    pub timeout_secs: Option<f64>,
    pub rate_limit_wait_secs: Option<f64>,
    pub backoff_base_secs: Option<f64>,
    pub progress_interval: Option<usize>,
    pub max_flush_failures: Option<u32>,
    pub compression: Option<Compression>,
}

fn seconds(field: &'static str, value: Option<f64>) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|secs| {
            Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
                field,
                reason: e.to_string(),
            })
        })
        .transpose()
}

impl ConfigFile {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let file = Self::parse(&text, path)?;
        debug!("Loaded config file {}", path.display());
        Ok(file)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Layers `overrides` on top of `self`; any key set in `overrides` wins.
    pub fn merge(self, overrides: ConfigFile) -> ConfigFile {
        ConfigFile {
            api_key: overrides.api_key.or(self.api_key),
            base_url: overrides.base_url.or(self.base_url),
            targets: overrides.targets.or(self.targets),
            output_dir: overrides.output_dir.or(self.output_dir),
            date_from: overrides.date_from.or(self.date_from),
            date_to: overrides.date_to.or(self.date_to),
            page_size: overrides.page_size.or(self.page_size),
            batch_size: overrides.batch_size.or(self.batch_size),
            max_workers: overrides.max_workers.or(self.max_workers),
            sensor_batch_size: overrides.sensor_batch_size.or(self.sensor_batch_size),
            max_sensors: overrides.max_sensors.or(self.max_sensors),
            include_mobile: overrides.include_mobile.or(self.include_mobile),
            include_monitor: overrides.include_monitor.or(self.include_monitor),
            request_delay_secs: overrides.request_delay_secs.or(self.request_delay_secs),
            max_retries: overrides.max_retries.or(self.max_retries),
            timeout_secs: overrides.timeout_secs.or(self.timeout_secs),
            rate_limit_wait_secs: overrides.rate_limit_wait_secs.or(self.rate_limit_wait_secs),
            backoff_base_secs: overrides.backoff_base_secs.or(self.backoff_base_secs),
            progress_interval: overrides.progress_interval.or(self.progress_interval),
            max_flush_failures: overrides.max_flush_failures.or(self.max_flush_failures),
            compression: overrides.compression.or(self.compression),
        }
    }

    /// Resolves into a validated [`IngestConfig`].
    pub fn into_config(self) -> Result<IngestConfig, ConfigError> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let date_from = self.date_from.as_deref().map(parse_timestamp).transpose()?;
        let date_to = self.date_to.as_deref().map(parse_timestamp).transpose()?;

        let config = IngestConfig::builder()
            .api_key(api_key)
            .maybe_base_url(self.base_url)
            .maybe_targets(self.targets)
            .maybe_output_dir(self.output_dir)
            .maybe_date_from(date_from)
            .maybe_date_to(date_to)
            .maybe_page_size(self.page_size)
            .maybe_batch_size(self.batch_size)
            .maybe_max_workers(self.max_workers)
            .maybe_sensor_batch_size(self.sensor_batch_size)
            .maybe_max_sensors(self.max_sensors)
            .maybe_include_mobile(self.include_mobile)
            .maybe_include_monitor(self.include_monitor)
            .maybe_request_delay(seconds("request_delay_secs", self.request_delay_secs)?)
            .maybe_max_retries(self.max_retries)
            .maybe_timeout(seconds("timeout_secs", self.timeout_secs)?)
            .maybe_rate_limit_wait(seconds("rate_limit_wait_secs", self.rate_limit_wait_secs)?)
            .maybe_backoff_base(seconds("backoff_base_secs", self.backoff_base_secs)?)
            .maybe_progress_interval(self.progress_interval)
            .maybe_max_flush_failures(self.max_flush_failures)
            .maybe_compression(self.compression)
            .build();

        config.validate()?;
        Ok(config)
    }
}
