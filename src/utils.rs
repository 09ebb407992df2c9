use crate::error::IngestError;
use chrono::{DateTime, Utc};
use log::info;
use std::io;
use std::path::Path;

/// Stamp shared by every file a run writes, e.g. `20250922_083000`.
pub fn run_stamp(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

pub async fn ensure_output_dir_exists(path: &Path) -> Result<(), IngestError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(IngestError::OutputDirNotADirectory(path.to_path_buf()));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating output directory: {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| IngestError::OutputDirCreation(path.to_path_buf(), e))
        }
        Err(e) => Err(IngestError::OutputDirCreation(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_stamp_format() {
        let at = Utc.with_ymd_and_hms(2025, 9, 22, 8, 3, 5).unwrap();
        assert_eq!(run_stamp(&at), "20250922_080305");
    }

    #[tokio::test]
    async fn test_output_dir_is_created() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("data").join("full_data");

        ensure_output_dir_exists(&nested).await?;
        assert!(nested.is_dir());
        // second call is a no-op
        ensure_output_dir_exists(&nested).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_output_path_is_a_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("taken");
        std::fs::write(&file, b"x")?;

        let result = ensure_output_dir_exists(&file).await;
        assert!(matches!(result, Err(IngestError::OutputDirNotADirectory(_))));
        Ok(())
    }
}
