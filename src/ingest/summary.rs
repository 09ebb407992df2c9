use crate::config::Target;
use crate::error::IngestError;
use crate::ingest::stats::{RunTotals, TargetStats};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Interrupted,
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Completed => "completed",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputFiles {
    pub locations: Vec<PathBuf>,
    pub sensors: Vec<PathBuf>,
    pub measurements: Vec<PathBuf>,
}

/// What a run configured and what it actually collected. Written next to the
/// parquet files as `ingestion_summary_{run_stamp}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_stamp: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub targets: Vec<Target>,
    pub totals: RunTotals,
    pub per_target: BTreeMap<String, TargetStats>,
    pub output_files: OutputFiles,
    pub abort_reason: Option<String>,
}

impl RunSummary {
    pub fn file_name(run_stamp: &str) -> String {
        format!("ingestion_summary_{}.json", run_stamp)
    }

    pub async fn write(&self, output_dir: &Path) -> Result<PathBuf, IngestError> {
        let path = output_dir.join(Self::file_name(&self.run_stamp));
        let json = serde_json::to_vec_pretty(self).map_err(IngestError::SummaryEncode)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| IngestError::SummaryWrite(path.clone(), e))?;
        info!("Ingestion summary saved to {}", path.display());
        Ok(path)
    }
}
