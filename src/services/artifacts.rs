//! JSON artifacts written by discovery and retrieval runs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::HarvestError;
use crate::models::{ContentRecord, RagDocument, RecordBatch, RunLog};

/// All RAG documents produced by one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagCollection {
    pub generated_at: DateTime<Utc>,
    pub count: usize,
    pub documents: Vec<RagDocument>,
}

impl RagCollection {
    pub fn new(documents: Vec<RagDocument>) -> Self {
        Self {
            generated_at: Utc::now(),
            count: documents.len(),
            documents,
        }
    }
}

/// Files written at the end of a retrieval run.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub log: PathBuf,
    pub rag: PathBuf,
    /// Present only when some records failed.
    pub failed: Option<PathBuf>,
}

/// UTC timestamp safe for file names.
pub fn timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// `{dir}/{stem}-{timestamp}.json`.
pub fn timestamped_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}-{}.json", stem, timestamp()))
}

/// Serialize `value` as pretty JSON, replacing `path` atomically.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), HarvestError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, HarvestError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub async fn read_batch(path: &Path) -> Result<RecordBatch, HarvestError> {
    let batch: RecordBatch = read_json(path).await?;
    info!(
        "Loaded {} records from {}{}",
        batch.data.len(),
        path.display(),
        match (batch.chunk_number, batch.total_chunks) {
            (Some(n), Some(total)) => format!(" (chunk {}/{})", n, total),
            _ => String::new(),
        }
    );
    Ok(batch)
}

/// Write discovery output to `path`, or a timestamped file in `dir`.
pub async fn save_discovery(
    dir: &Path,
    path: Option<&Path>,
    batch: &RecordBatch,
) -> Result<PathBuf, HarvestError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| timestamped_path(dir, "discovered"));
    write_json(&path, batch).await?;
    info!("Saved {} records to {}", batch.data.len(), path.display());
    Ok(path)
}

/// Keeps one run's log, RAG collection and failed-records file current.
///
/// Each checkpoint rewrites the files atomically, so an interrupted run
/// still leaves a log of every record finished before the interrupt.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    log: PathBuf,
    rag: PathBuf,
    failed: PathBuf,
}

impl RunRecorder {
    /// Timestamped file names under `dir`; nothing is written yet.
    pub fn new(dir: &Path) -> Self {
        let stamp = timestamp();
        Self {
            log: dir.join(format!("upload-log-{}.json", stamp)),
            rag: dir.join(format!("rag-documents-{}.json", stamp)),
            failed: dir.join(format!("failed-records-{}.json", stamp)),
        }
    }

    /// Paths of the files written so far.
    pub fn artifacts(&self) -> RunArtifacts {
        RunArtifacts {
            log: self.log.clone(),
            rag: self.rag.clone(),
            failed: Some(self.failed.clone()).filter(|p| p.exists()),
        }
    }

    /// Write the current state of the run.
    ///
    /// The failed-records file appears with the first failure.
    pub async fn save(
        &self,
        log: &RunLog,
        documents: Vec<RagDocument>,
        failed: &[ContentRecord],
    ) -> Result<RunArtifacts, HarvestError> {
        write_json(&self.log, log).await?;
        write_json(&self.rag, &RagCollection::new(documents)).await?;
        if !failed.is_empty() {
            write_json(&self.failed, &RecordBatch::new(failed.to_vec())).await?;
        }
        Ok(self.artifacts())
    }
}

/// Write the run log, RAG collection and (if any) failed records once.
pub async fn save_run(
    dir: &Path,
    log: &RunLog,
    documents: Vec<RagDocument>,
    failed: Vec<ContentRecord>,
) -> Result<RunArtifacts, HarvestError> {
    RunRecorder::new(dir).save(log, documents, &failed).await
}

/// Split a discovery file into chunk files of `chunk_size` records.
pub async fn split_file(
    input: &Path,
    chunk_size: usize,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, HarvestError> {
    let batch = read_batch(input).await?;
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("records")
        .to_string();

    let mut paths = Vec::new();
    for chunk in batch.into_chunks(chunk_size) {
        let number = chunk.chunk_number.unwrap_or(paths.len() + 1);
        let path = out_dir.join(format!("{}-chunk-{:03}.json", stem, number));
        write_json(&path, &chunk).await?;
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceRef, UploadLogEntry};

    fn records(n: usize) -> Vec<ContentRecord> {
        (1..=n)
            .map(|i| {
                ContentRecord::new(
                    ResourceRef::parse(&format!("https://a.org/aid/{}/", i)).unwrap(),
                    ResourceRef::parse(&format!("https://a.org/{}.mp3", i)).unwrap(),
                    Default::default(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_split_file_writes_numbered_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("discovered.json");
        write_json(&input, &RecordBatch::new(records(5))).await.unwrap();

        let out = dir.path().join("chunks");
        let paths = split_file(&input, 2, &out).await.unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths[0].ends_with("discovered-chunk-001.json"));

        let last = read_batch(&paths[2]).await.unwrap();
        assert_eq!(last.data.len(), 1);
        assert_eq!(last.chunk_number, Some(3));
        assert_eq!(last.total_chunks, Some(3));
        assert_eq!(last.start_index, Some(4));
    }

    #[tokio::test]
    async fn test_save_run_writes_failed_records_only_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new();
        let recs = records(1);
        log.push(UploadLogEntry::failed(1, &recs[0], "timeout"));
        log.finish();

        let artifacts = save_run(dir.path(), &log, vec![], recs).await.unwrap();
        let failed = read_batch(artifacts.failed.as_ref().unwrap()).await.unwrap();
        assert_eq!(failed.data.len(), 1);

        let saved: serde_json::Value = read_json(&artifacts.log).await.unwrap();
        assert_eq!(saved["summary"]["successRate"], "0.00%");

        let clean = save_run(&dir.path().join("clean"), &RunLog::new(), vec![], vec![])
            .await
            .unwrap();
        assert!(clean.failed.is_none());
    }

    #[tokio::test]
    async fn test_recorder_checkpoints_overwrite_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = RunRecorder::new(dir.path());
        let recs = records(2);

        let mut log = RunLog::new();
        log.push(UploadLogEntry::failed(1, &recs[0], "timeout"));
        recorder.save(&log, vec![], &recs[..1]).await.unwrap();
        log.push(UploadLogEntry::failed(2, &recs[1], "timeout"));
        let artifacts = recorder.save(&log, vec![], &recs).await.unwrap();

        let saved: RunLog = read_json(&artifacts.log).await.unwrap();
        assert_eq!(saved.entries.len(), 2);
        assert!(saved.finished_at.is_none());
        let failed = read_batch(artifacts.failed.as_ref().unwrap()).await.unwrap();
        assert_eq!(failed.data.len(), 2);
        // One file per artifact, plus nothing left over from atomic writes
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }
}
