//! Drives one ingestion run: locations per target, their sensors, then every
//! sensor's measurements, flushing to parquet along the way and finishing
//! with a run summary.
//!
//! A run always ends with a summary, whether it completed, was interrupted
//! through the [`CancellationToken`] or was aborted because a buffer kept
//! failing to flush.

pub mod stats;
pub mod summary;

use crate::batch::buffer::BatchBuffer;
use crate::batch::RecordKind;
use crate::config::{api_timestamp, IngestConfig};
use crate::error::IngestError;
use crate::flatten::context::{LocationContext, SensorContext};
use crate::flatten::record::FlatRecord;
use crate::flatten::{flatten_location, flatten_measurement, flatten_sensor, sensors_of};
use crate::http::client::{ApiClient, OpenAqClient, QueryParams};
use crate::http::retry::Fetcher;
use crate::ingest::stats::RunStats;
use crate::ingest::summary::{OutputFiles, RunStatus, RunSummary};
use crate::paginate::{Coverage, Paginator};
use crate::utils::{ensure_output_dir_exists, run_stamp};
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    CollectingLocations,
    ExtractingSensors,
    CollectingMeasurements,
    Summarizing,
    Done,
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::Init => "init",
            RunPhase::CollectingLocations => "collecting locations",
            RunPhase::ExtractingSensors => "extracting sensors",
            RunPhase::CollectingMeasurements => "collecting measurements",
            RunPhase::Summarizing => "summarizing",
            RunPhase::Done => "done",
            RunPhase::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Why a run left the normal phase sequence early.
#[derive(Debug)]
enum Halt {
    Interrupted,
    Aborted(String),
}

/// A sensor queued for measurement collection.
#[derive(Debug, Clone)]
struct SensorWork {
    target: String,
    context: SensorContext,
}

struct SensorOutcome {
    target: String,
    label: String,
    records: Vec<FlatRecord>,
    requests: u32,
    coverage: Coverage,
    /// The sensor had no id, so nothing was requested.
    skipped: bool,
}

/// Everything the workers' results are merged into. Lives behind the run's
/// single lock.
struct RunState {
    stats: RunStats,
    locations: BatchBuffer,
    sensors: BatchBuffer,
    measurements: BatchBuffer,
}

impl RunState {
    fn new(config: &IngestConfig, run_stamp: &str) -> Self {
        let buffer = |kind| {
            BatchBuffer::new(
                kind,
                config.batch_size,
                &config.output_dir,
                run_stamp,
                config.compression,
            )
        };
        Self {
            stats: RunStats::default(),
            locations: buffer(RecordKind::Locations),
            sensors: buffer(RecordKind::Sensors),
            measurements: buffer(RecordKind::Measurements),
        }
    }

    fn batches_written(&self) -> u32 {
        self.locations.batches_written()
            + self.sensors.batches_written()
            + self.measurements.batches_written()
    }

    fn buffer_mut(&mut self, kind: RecordKind) -> &mut BatchBuffer {
        match kind {
            RecordKind::Locations => &mut self.locations,
            RecordKind::Sensors => &mut self.sensors,
            RecordKind::Measurements => &mut self.measurements,
        }
    }

    /// Buffers `record`, flushing if the buffer is full. Too many failed
    /// flushes in a row halt the run.
    async fn push(
        &mut self,
        kind: RecordKind,
        record: FlatRecord,
        max_flush_failures: u32,
    ) -> Result<(), Halt> {
        let buffer = self.buffer_mut(kind);
        buffer.add(record);
        match buffer.maybe_flush().await {
            None | Some(Ok(_)) => Ok(()),
            Some(Err(e)) => {
                let failures = buffer.consecutive_failures();
                self.stats.totals.flush_failures += 1;
                escalate(kind, failures, max_flush_failures, &e)
            }
        }
    }

    /// Pushes every record. Once the run halts the rest are still buffered,
    /// without further flush attempts, so the final flush sees them.
    async fn push_all(
        &mut self,
        kind: RecordKind,
        records: impl IntoIterator<Item = FlatRecord>,
        max_flush_failures: u32,
    ) -> Result<(), Halt> {
        let mut halt = None;
        for record in records {
            if halt.is_some() {
                self.buffer_mut(kind).add(record);
            } else if let Err(h) = self.push(kind, record, max_flush_failures).await {
                halt = Some(h);
            }
        }
        halt.map_or(Ok(()), Err)
    }

    async fn flush(&mut self, kind: RecordKind, max_flush_failures: u32) -> Result<(), Halt> {
        let buffer = self.buffer_mut(kind);
        match buffer.flush().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let failures = buffer.consecutive_failures();
                self.stats.totals.flush_failures += 1;
                escalate(kind, failures, max_flush_failures, &e)
            }
        }
    }

    /// Last attempt to persist whatever is still buffered. Failures are
    /// counted, never escalated.
    async fn flush_all(&mut self) {
        for buffer in [&mut self.locations, &mut self.sensors, &mut self.measurements] {
            if let Err(e) = buffer.flush().await {
                self.stats.totals.flush_failures += 1;
                error!(
                    "Final flush of {} lost {} buffered records: {}",
                    buffer.kind(),
                    buffer.len(),
                    e
                );
            }
        }
    }
}

fn escalate(
    kind: RecordKind,
    consecutive_failures: u32,
    max_flush_failures: u32,
    error: &dyn std::error::Error,
) -> Result<(), Halt> {
    if consecutive_failures >= max_flush_failures {
        Err(Halt::Aborted(format!(
            "{} consecutive flush failures on the {} buffer, last: {}",
            consecutive_failures, kind, error
        )))
    } else {
        Ok(())
    }
}

/// Run-scoped state: identity, the resolved date window, the current phase
/// and the shared stats and buffers.
struct RunContext {
    run_stamp: String,
    started_at: DateTime<Utc>,
    date_from: DateTime<Utc>,
    date_to: DateTime<Utc>,
    phase: RunPhase,
    state: Mutex<RunState>,
}

impl RunContext {
    fn new(config: &IngestConfig, started_at: DateTime<Utc>) -> Self {
        let stamp = run_stamp(&started_at);
        Self {
            state: Mutex::new(RunState::new(config, &stamp)),
            run_stamp: stamp,
            started_at,
            date_from: config.date_from,
            date_to: config.date_to.unwrap_or(started_at),
            phase: RunPhase::Init,
        }
    }

    fn enter(&mut self, next: RunPhase) {
        info!("Phase: {} -> {}", self.phase, next);
        self.phase = next;
    }
}

/// Runs ingestions against an [`ApiClient`].
pub struct Ingestor<C> {
    config: IngestConfig,
    fetcher: Fetcher<C>,
    cancel: CancellationToken,
}

impl Ingestor<OpenAqClient> {
    /// Validates `config` and connects to the configured OpenAQ endpoint.
    pub fn new(config: IngestConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let client = OpenAqClient::new(&config.base_url, &config.api_key, config.timeout)
            .map_err(IngestError::HttpClient)?;
        Ok(Self::with_client(config, client))
    }
}

impl<C: ApiClient> Ingestor<C> {
    pub fn with_client(config: IngestConfig, client: C) -> Self {
        let fetcher = Fetcher::new(client, config.retry_policy(), config.request_delay);
        Self {
            config,
            fetcher,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Cancelling this token interrupts the run; it still flushes and
    /// writes its summary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<RunSummary, IngestError> {
        self.run_at(Utc::now()).await
    }

    /// Runs with an explicit start time, which also fixes the run stamp used
    /// in every file name.
    pub async fn run_at(&self, started_at: DateTime<Utc>) -> Result<RunSummary, IngestError> {
        let config = &self.config;
        config.validate()?;
        let mut ctx = RunContext::new(config, started_at);

        info!("Starting OpenAQ ingestion run {}", ctx.run_stamp);
        info!(
            "Targets: {}",
            config
                .targets
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        info!("Output directory: {}", config.output_dir.display());
        info!(
            "Window: {} .. {} | batch size {} | workers {}",
            api_timestamp(&ctx.date_from),
            api_timestamp(&ctx.date_to),
            config.batch_size,
            config.max_workers
        );
        ensure_output_dir_exists(&config.output_dir).await?;

        let (status, abort_reason) = match self.collect(&mut ctx).await {
            Ok(()) => (RunStatus::Completed, None),
            Err(Halt::Interrupted) => {
                warn!("Ingestion interrupted during {}", ctx.phase);
                (RunStatus::Interrupted, None)
            }
            Err(Halt::Aborted(reason)) => {
                error!("Ingestion aborted during {}: {}", ctx.phase, reason);
                ctx.enter(RunPhase::Aborted);
                (RunStatus::Aborted, Some(reason))
            }
        };

        ctx.enter(RunPhase::Summarizing);
        let summary = self.summarize(&ctx, status, abort_reason).await;
        summary.write(&config.output_dir).await?;
        log_final_statistics(&summary);

        ctx.enter(match status {
            RunStatus::Aborted => RunPhase::Aborted,
            _ => RunPhase::Done,
        });
        Ok(summary)
    }

    async fn collect(&self, ctx: &mut RunContext) -> Result<(), Halt> {
        ctx.enter(RunPhase::CollectingLocations);
        let mut collected = Vec::with_capacity(self.config.targets.len());
        for target in &self.config.targets {
            if self.cancel.is_cancelled() {
                return Err(Halt::Interrupted);
            }
            let locations = self.collect_locations(ctx, &target.name, target.id).await?;
            collected.push((target.name.clone(), locations));
        }

        ctx.enter(RunPhase::ExtractingSensors);
        let mut work = self.extract_sensors(ctx, &collected).await?;
        drop(collected);

        if let Some(max) = self.config.max_sensors {
            if work.len() > max {
                info!("Limiting measurement collection to {} of {} sensors", max, work.len());
                work.truncate(max);
            }
        }

        ctx.enter(RunPhase::CollectingMeasurements);
        self.collect_measurements(ctx, &work).await
    }

    async fn until_cancelled<F: Future>(&self, future: F) -> Result<F::Output, Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Interrupted),
            output = future => Ok(output),
        }
    }

    async fn collect_locations(
        &self,
        ctx: &RunContext,
        target: &str,
        country_id: u32,
    ) -> Result<Vec<Value>, Halt> {
        info!("Collecting locations for {} (id {})", target, country_id);
        let paginator = Paginator::new(&self.fetcher, self.config.page_size);
        let mut params = QueryParams::new();
        params.insert("countries_id".to_string(), country_id.to_string());

        let paginated = self
            .until_cancelled(paginator.collect("locations", &params))
            .await?;

        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        if let Coverage::Partial { page, error } = &paginated.coverage {
            state.stats.totals.partial_coverage += 1;
            state.stats.totals.errors += 1;
            warn!(
                "Partial location coverage for {}: stopped at page {} ({}), keeping {} locations",
                target,
                page,
                error,
                paginated.records.len()
            );
        }

        let pushed = state
            .push_all(
                RecordKind::Locations,
                paginated.records.iter().map(flatten_location),
                self.config.max_flush_failures,
            )
            .await;

        let count = paginated.records.len();
        state.stats.totals.locations += count;
        state.stats.totals.targets_processed += 1;
        state.stats.target_mut(target).locations += count;
        info!(
            "{}: {} locations in {} requests",
            target, count, paginated.requests
        );
        pushed.map(|()| paginated.records)
    }

    fn keep_location(&self, location: &Value) -> bool {
        let flag = |key| location.get(key).and_then(Value::as_bool).unwrap_or(false);
        (self.config.include_mobile || !flag("isMobile"))
            && (self.config.include_monitor || !flag("isMonitor"))
    }

    async fn extract_sensors(
        &self,
        ctx: &RunContext,
        collected: &[(String, Vec<Value>)],
    ) -> Result<Vec<SensorWork>, Halt> {
        let max_failures = self.config.max_flush_failures;
        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        let mut work = Vec::new();

        for (target, locations) in collected {
            info!("Extracting sensors from {} locations in {}", locations.len(), target);
            let mut rows = Vec::new();
            for location in locations {
                if !self.keep_location(location) {
                    debug!("Skipping filtered location {:?}", location.get("id"));
                    continue;
                }
                let location_context = LocationContext::from_location(location);
                for sensor in sensors_of(location) {
                    rows.push(flatten_sensor(sensor, &location_context));
                    work.push(SensorWork {
                        target: target.clone(),
                        context: SensorContext::from_sensor(sensor, &location_context),
                    });
                }
            }

            let extracted = rows.len();
            let pushed = state.push_all(RecordKind::Sensors, rows, max_failures).await;
            state.stats.totals.sensors += extracted;
            state.stats.target_mut(target).sensors += extracted;
            info!("{}: {} sensors extracted", target, extracted);
            pushed?;
        }

        state.flush(RecordKind::Locations, max_failures).await?;
        state.flush(RecordKind::Sensors, max_failures).await?;
        Ok(work)
    }

    async fn collect_measurements(
        &self,
        ctx: &RunContext,
        work: &[SensorWork],
    ) -> Result<(), Halt> {
        let chunk_size = self.config.sensor_batch_size;
        let total_chunks = work.len().div_ceil(chunk_size);
        let date_from = api_timestamp(&ctx.date_from);
        let date_to = api_timestamp(&ctx.date_to);
        info!("Collecting measurements for {} sensors", work.len());

        for (index, chunk) in work.chunks(chunk_size).enumerate() {
            if self.cancel.is_cancelled() {
                return Err(Halt::Interrupted);
            }
            info!(
                "Processing sensor batch {}/{} ({} sensors)",
                index + 1,
                total_chunks,
                chunk.len()
            );

            let mut outcomes = std::pin::pin!(stream::iter(chunk)
                .map(|sensor| self.collect_sensor(sensor, &date_from, &date_to))
                .buffer_unordered(self.config.max_workers));
            // Outcomes that finished while an earlier one was being merged.
            let mut ready = VecDeque::new();
            let mut exhausted = false;

            loop {
                if self.cancel.is_cancelled() {
                    return Err(Halt::Interrupted);
                }
                let outcome = match ready.pop_front() {
                    Some(outcome) => outcome,
                    None if exhausted => break,
                    None => tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(Halt::Interrupted),
                        next = outcomes.next() => match next {
                            Some(outcome) => outcome,
                            None => break,
                        },
                    },
                };

                // Keep the workers' requests moving while a merge waits on a flush.
                let mut merging = std::pin::pin!(self.merge(ctx, outcome, work.len()));
                loop {
                    tokio::select! {
                        biased;
                        merged = &mut merging => {
                            merged?;
                            break;
                        }
                        next = outcomes.next(), if !exhausted => match next {
                            Some(outcome) => ready.push_back(outcome),
                            None => exhausted = true,
                        },
                    }
                }
            }
        }
        Ok(())
    }

    /// Fetches and flattens every measurement of one sensor in the run window.
    async fn collect_sensor(
        &self,
        sensor: &SensorWork,
        date_from: &str,
        date_to: &str,
    ) -> SensorOutcome {
        let label = sensor.context.label();
        let Some(sensor_id) = sensor.context.sensor_id else {
            return SensorOutcome {
                target: sensor.target.clone(),
                label,
                records: Vec::new(),
                requests: 0,
                coverage: Coverage::Complete,
                skipped: true,
            };
        };

        let endpoint = format!("sensors/{}/measurements", sensor_id);
        let mut params = QueryParams::new();
        params.insert("date_from".to_string(), date_from.to_string());
        params.insert("date_to".to_string(), date_to.to_string());

        let paginated = Paginator::new(&self.fetcher, self.config.page_size)
            .collect(&endpoint, &params)
            .await;

        let ingested_at = Utc::now();
        let records = paginated
            .records
            .iter()
            .map(|measurement| flatten_measurement(measurement, &sensor.context, ingested_at))
            .collect();

        SensorOutcome {
            target: sensor.target.clone(),
            label,
            records,
            requests: paginated.requests,
            coverage: paginated.coverage,
            skipped: false,
        }
    }

    async fn merge(
        &self,
        ctx: &RunContext,
        outcome: SensorOutcome,
        total_sensors: usize,
    ) -> Result<(), Halt> {
        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        let count = outcome.records.len();

        state.stats.totals.sensors_processed += 1;
        if outcome.skipped {
            state.stats.totals.errors += 1;
            warn!("Skipping sensor without an id: {}", outcome.label);
        }
        if let Coverage::Partial { page, error } = &outcome.coverage {
            state.stats.totals.partial_coverage += 1;
            state.stats.totals.errors += 1;
            warn!(
                "Partial coverage for sensor {}: stopped at page {} ({}), keeping {} measurements",
                outcome.label, page, error, count
            );
        }
        debug!(
            "Sensor {}: {} measurements in {} requests",
            outcome.label, count, outcome.requests
        );

        state.stats.totals.measurements += count;
        state.stats.target_mut(&outcome.target).measurements += count;
        let pushed = state
            .push_all(
                RecordKind::Measurements,
                outcome.records,
                self.config.max_flush_failures,
            )
            .await;

        let processed = state.stats.totals.sensors_processed;
        if processed % self.config.progress_interval == 0 || processed == total_sensors {
            log_progress(ctx, state, total_sensors, self.config.targets.len());
        }
        pushed
    }

    async fn summarize(
        &self,
        ctx: &RunContext,
        status: RunStatus,
        abort_reason: Option<String>,
    ) -> RunSummary {
        let mut guard = ctx.state.lock().await;
        let state = &mut *guard;
        state.flush_all().await;

        let mut totals = state.stats.totals.clone();
        totals.batches_written = state.batches_written();
        let finished_at = Utc::now();

        RunSummary {
            run_stamp: ctx.run_stamp.clone(),
            status,
            started_at: ctx.started_at,
            finished_at,
            duration_seconds: (finished_at - ctx.started_at).num_milliseconds() as f64 / 1000.0,
            date_from: ctx.date_from,
            date_to: ctx.date_to,
            targets: self.config.targets.clone(),
            totals,
            per_target: state.stats.per_target.clone(),
            output_files: OutputFiles {
                locations: state.locations.written_files().to_vec(),
                sensors: state.sensors.written_files().to_vec(),
                measurements: state.measurements.written_files().to_vec(),
            },
            abort_reason,
        }
    }
}

fn log_progress(ctx: &RunContext, state: &RunState, total_sensors: usize, total_targets: usize) {
    let elapsed = Utc::now() - ctx.started_at;
    let totals = &state.stats.totals;
    info!(
        "Progress: {}s elapsed | targets {}/{} | locations {} | sensors {}/{} | measurements {} | batches {}",
        elapsed.num_seconds(),
        totals.targets_processed,
        total_targets,
        totals.locations,
        totals.sensors_processed,
        total_sensors,
        totals.measurements,
        state.batches_written()
    );
}

fn log_final_statistics(summary: &RunSummary) {
    let totals = &summary.totals;
    info!("Ingestion {} ({})", summary.status, summary.run_stamp);
    info!(
        "Runtime: {:.1} minutes | targets {}/{}",
        summary.duration_seconds / 60.0,
        totals.targets_processed,
        summary.targets.len()
    );
    info!(
        "Locations {} | sensors {} ({} processed) | measurements {}",
        totals.locations, totals.sensors, totals.sensors_processed, totals.measurements
    );
    info!(
        "Batches written {} | flush failures {} | errors {} | partial coverage {}",
        totals.batches_written, totals.flush_failures, totals.errors, totals.partial_coverage
    );
    if totals.measurements > 0 && summary.duration_seconds > 0.0 {
        info!(
            "Average rate: {:.1} measurements/second",
            totals.measurements as f64 / summary.duration_seconds
        );
    }
}
