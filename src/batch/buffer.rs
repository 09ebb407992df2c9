use crate::batch::error::FlushError;
use crate::batch::writer::{records_to_dataframe, write_parquet};
use crate::batch::RecordKind;
use crate::config::Compression;
use crate::flatten::record::FlatRecord;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::task;

/// Outcome of a successful flush.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub kind: RecordKind,
    pub batch_index: u32,
    pub records: usize,
    pub path: PathBuf,
}

/// Accumulates flat records of one [`RecordKind`] and writes them out as
/// parquet files once `threshold` records are buffered.
///
/// A failed flush leaves the buffered records untouched, so no row is lost.
/// [`maybe_flush`](Self::maybe_flush) retries them only once another
/// `threshold` records have arrived.
#[derive(Debug)]
pub struct BatchBuffer {
    kind: RecordKind,
    threshold: usize,
    output_dir: PathBuf,
    run_stamp: String,
    compression: Compression,
    records: Vec<FlatRecord>,
    next_batch_index: u32,
    consecutive_failures: u32,
    /// Buffer length at which the next threshold flush is due.
    flush_due_at: usize,
    written_files: Vec<PathBuf>,
}

impl BatchBuffer {
    pub fn new(
        kind: RecordKind,
        threshold: usize,
        output_dir: impl Into<PathBuf>,
        run_stamp: impl Into<String>,
        compression: Compression,
    ) -> Self {
        Self {
            kind,
            threshold: threshold.max(1),
            output_dir: output_dir.into(),
            run_stamp: run_stamp.into(),
            compression,
            records: Vec::new(),
            next_batch_index: 0,
            consecutive_failures: 0,
            flush_due_at: threshold.max(1),
            written_files: Vec::new(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn batches_written(&self) -> u32 {
        self.next_batch_index
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn written_files(&self) -> &[PathBuf] {
        &self.written_files
    }

    pub fn add(&mut self, record: FlatRecord) {
        self.records.push(record);
    }

    /// Flushes when at least `threshold` records are buffered, or after a
    /// failure, once `threshold` more records have arrived since.
    pub async fn maybe_flush(&mut self) -> Option<Result<FlushReport, FlushError>> {
        if self.records.len() < self.flush_due_at {
            return None;
        }
        // The buffer is non-empty here, so `flush` always yields a report on success.
        self.flush().await.transpose()
    }

    /// `add` followed by `maybe_flush` for every record. Returns the outcome
    /// of each flush that was attempted.
    pub async fn extend(
        &mut self,
        records: impl IntoIterator<Item = FlatRecord>,
    ) -> Vec<Result<FlushReport, FlushError>> {
        let mut outcomes = Vec::new();
        for record in records {
            self.add(record);
            if let Some(outcome) = self.maybe_flush().await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn batch_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{}_batch_{:04}_{}.parquet",
            self.kind.file_prefix(),
            self.next_batch_index,
            self.run_stamp
        ))
    }

    /// Writes everything buffered to the next batch file. `Ok(None)` when
    /// there was nothing to write.
    pub async fn flush(&mut self) -> Result<Option<FlushReport>, FlushError> {
        if self.records.is_empty() {
            debug!("Nothing to flush for {}", self.kind);
            return Ok(None);
        }

        let path = self.batch_path();
        match self.write_batch(&path).await {
            Ok(bytes) => {
                let report = FlushReport {
                    kind: self.kind,
                    batch_index: self.next_batch_index,
                    records: self.records.len(),
                    path: path.clone(),
                };
                info!(
                    "Flushed {} {} records to {} ({} bytes)",
                    report.records,
                    self.kind,
                    path.display(),
                    bytes
                );
                self.records.clear();
                self.next_batch_index += 1;
                self.consecutive_failures = 0;
                self.flush_due_at = self.threshold;
                self.written_files.push(path);
                Ok(Some(report))
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.flush_due_at = self.records.len().saturating_add(self.threshold);
                warn!(
                    "Failed to flush {} {} records to {} (attempt {} in a row): {}",
                    self.records.len(),
                    self.kind,
                    path.display(),
                    self.consecutive_failures,
                    e
                );
                Err(e)
            }
        }
    }

    async fn write_batch(&self, path: &Path) -> Result<u64, FlushError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| FlushError::OutputDir(self.output_dir.clone(), e))?;

        let df = records_to_dataframe(&self.records).map_err(|e| FlushError::DataFrame {
            kind: self.kind,
            source: e,
        })?;

        let path_buf = path.to_path_buf();
        let compression = self.compression;
        task::spawn_blocking(move || write_parquet(df, &path_buf, compression)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::record::Scalar;
    use polars::prelude::*;

    fn measurement(i: usize) -> FlatRecord {
        let mut record = FlatRecord::new();
        record.insert("value", Some(i as f64));
        record.insert("sensor_id", Some(7710i64));
        record
    }

    fn buffer(dir: &Path, threshold: usize) -> BatchBuffer {
        BatchBuffer::new(
            RecordKind::Measurements,
            threshold,
            dir,
            "20250922_083000",
            Compression::Snappy,
        )
    }

    fn rows_in(path: &Path) -> PolarsResult<usize> {
        Ok(LazyFrame::scan_parquet(path, Default::default())?
            .collect()?
            .height())
    }

    #[tokio::test]
    async fn test_threshold_crossing_flushes_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut buffer = buffer(dir.path(), 75_000);

        let outcomes = buffer.extend((0..75_001).map(measurement)).await;

        assert_eq!(outcomes.len(), 1);
        let report = outcomes.into_iter().next().ok_or("no flush happened")??;
        assert_eq!(report.records, 75_000);
        assert_eq!(report.batch_index, 0);
        assert_eq!(
            report.path.file_name().and_then(|n| n.to_str()),
            Some("measurements_batch_0000_20250922_083000.parquet")
        );
        assert_eq!(rows_in(&report.path)?, 75_000);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.batches_written(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_buffer_stays_below_threshold() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut buffer = buffer(dir.path(), 7);

        for i in 0..50 {
            buffer.add(measurement(i));
            if let Some(outcome) = buffer.maybe_flush().await {
                outcome?;
                assert_eq!(buffer.len(), 0);
            }
            assert!(buffer.len() < buffer.threshold());
        }

        assert_eq!(buffer.batches_written(), 7);
        assert_eq!(buffer.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_flush_empty_buffer_is_noop() -> Result<(), FlushError> {
        let dir = tempfile::tempdir().map_err(|e| FlushError::OutputDir(PathBuf::new(), e))?;
        let mut buffer = buffer(dir.path(), 10);

        assert!(buffer.flush().await?.is_none());
        assert!(buffer.maybe_flush().await.is_none());
        assert!(buffer.written_files().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_final_flush_and_batch_numbering() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut buffer = buffer(dir.path(), 3);

        buffer.extend((0..4).map(measurement)).await;
        let last = buffer.flush().await?.ok_or("expected a final batch")?;

        assert_eq!(last.batch_index, 1);
        assert_eq!(last.records, 1);
        assert_eq!(buffer.written_files().len(), 2);
        assert!(buffer.written_files()[1]
            .to_string_lossy()
            .ends_with("measurements_batch_0001_20250922_083000.parquet"));
        assert!(buffer.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_records() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        // A regular file where the output directory should be.
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"")?;
        let mut buffer = buffer(&blocker.join("out"), 2);

        let outcomes = buffer.extend((0..5).map(measurement)).await;

        // Attempts at 2 and 4 records; 3 and 5 wait for the next crossing.
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(o, Err(FlushError::OutputDir(..)))));
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.consecutive_failures(), 2);
        assert_eq!(buffer.batches_written(), 0);
        assert!(buffer.written_files().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_on_next_crossing(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let squatter = dir
            .path()
            .join("measurements_batch_0000_20250922_083000.parquet");
        std::fs::create_dir(&squatter)?;
        let mut buffer = buffer(dir.path(), 5);

        let failed = buffer.extend((0..5).map(measurement)).await;
        assert_eq!(failed.len(), 1);
        assert!(failed[0].is_err());
        assert_eq!(buffer.consecutive_failures(), 1);

        std::fs::remove_dir(&squatter)?;
        let waiting = buffer.extend((5..9).map(measurement)).await;
        assert!(waiting.is_empty());
        assert_eq!(buffer.len(), 9);

        buffer.add(measurement(9));
        let report = buffer.maybe_flush().await.ok_or("flush was due")??;
        assert_eq!(report.records, 10);
        assert_eq!(report.batch_index, 0);
        assert_eq!(rows_in(&report.path)?, 10);
        assert_eq!(buffer.consecutive_failures(), 0);
        assert!(buffer.is_empty());

        // Back on the normal schedule after recovering.
        let outcomes = buffer.extend((0..5).map(measurement)).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(buffer.batches_written(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_heterogeneous_batch_is_written() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut buffer = BatchBuffer::new(
            RecordKind::Locations,
            100,
            dir.path(),
            "20250922_083000",
            Compression::Gzip,
        );

        let mut first = FlatRecord::new();
        first.insert("location_id", Some(1i64));
        let mut second = FlatRecord::new();
        second.insert("location_id", Some(2i64));
        second.insert("locality", Scalar::Str("Lalitpur".into()));
        buffer.add(first);
        buffer.add(second);

        let report = buffer.flush().await?.ok_or("expected a batch")?;
        let df = LazyFrame::scan_parquet(&report.path, Default::default())?.collect()?;

        assert_eq!(df.shape(), (2, 2));
        assert_eq!(df.column("locality")?.null_count(), 1);
        Ok(())
    }
}
