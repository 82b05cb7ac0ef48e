use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::QueueItem;

/// Hidden marker that claims a rip folder for the pipeline
pub const JOB_FILENAME: &str = ".ripq.job.json";
/// Audit record written after a successful move
pub const RECEIPT_FILENAME: &str = ".ripq.receipt.json";

/// Per-disc working record, persisted alongside the ripped files when the
/// rip folder is created and read back by the move step. Never mutated
/// after creation for a given folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub clz_index: u32,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    pub imdb_id: String,
}

impl From<&QueueItem> for Job {
    fn from(item: &QueueItem) -> Self {
        Self {
            clz_index: item.clz_index,
            title: item.title.clone(),
            year: item.year,
            imdb_id: item.imdb_id.clone(),
        }
    }
}

pub fn write_job(folder: &Path, job: &Job) -> Result<()> {
    let path = folder.join(JOB_FILENAME);
    let content = serde_json::to_string_pretty(job)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write job marker: {}", path.display()))?;
    Ok(())
}

/// Read the job marker back, or None if the folder has none (and is
/// therefore not owned by the pipeline)
pub fn load_job(folder: &Path) -> Result<Option<Job>> {
    let path = folder.join(JOB_FILENAME);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read job marker: {}", path.display()))?;
    let job = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse job marker: {}", path.display()))?;
    Ok(Some(job))
}

/// Write-once audit trail for one completed item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub rip_folder: PathBuf,
    pub keeper_source: PathBuf,
    pub keeper_dest: PathBuf,
    pub clz_index: u32,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    pub imdb_id: String,
    pub completed_at: DateTime<Utc>,
}

pub fn write_receipt(folder: &Path, receipt: &Receipt) -> Result<()> {
    let path = folder.join(RECEIPT_FILENAME);
    let content = serde_json::to_string_pretty(receipt)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write receipt: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job {
            clz_index: 10,
            title: "Alien".to_string(),
            year: Some(1979),
            imdb_id: "tt0078748".to_string(),
        }
    }

    #[test]
    fn job_marker_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let job = sample_job();
        write_job(dir.path(), &job).unwrap();

        let loaded = load_job(dir.path()).unwrap();
        assert_eq!(loaded, Some(job));
    }

    #[test]
    fn unowned_folder_has_no_job() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_job(dir.path()).unwrap(), None);
    }

    #[test]
    fn receipt_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let receipt = Receipt {
            rip_folder: dir.path().to_path_buf(),
            keeper_source: dir.path().join("title_t00.mkv"),
            keeper_dest: PathBuf::from("/staging/Alien (1979)/Alien (1979).mkv"),
            clz_index: 10,
            title: "Alien".to_string(),
            year: Some(1979),
            imdb_id: "tt0078748".to_string(),
            completed_at: Utc::now(),
        };
        write_receipt(dir.path(), &receipt).unwrap();

        let content = std::fs::read_to_string(dir.path().join(RECEIPT_FILENAME)).unwrap();
        let loaded: Receipt = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.clz_index, 10);
        assert_eq!(loaded.keeper_dest, receipt.keeper_dest);
    }
}
