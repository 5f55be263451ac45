//! Per-record processing: retrieve, derive, publish.
//!
//! Records run one at a time over the shared session. A failing record is
//! logged and counted; the loop always moves on to the next one. With a
//! [`RunRecorder`] attached, the run's files are rewritten after every
//! record, so cancelling the run loses nothing that already finished.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use super::artifacts::{RunArtifacts, RunRecorder};
use super::object_store::ObjectStore;
use super::placement::PlacementDeriver;
use super::retrieval::Retriever;
use crate::context::{RunContext, RunEvent};
use crate::error::HarvestError;
use crate::models::{ContentRecord, RagDocument, RunLog, StoragePlacement, UploadLogEntry};
use crate::scrapers::driver::PageDriver;

/// Everything a retrieval run produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub log: RunLog,
    pub placements: Vec<StoragePlacement>,
    /// Failed records, each carrying its sequence index.
    pub failed: Vec<ContentRecord>,
    /// Files from the last checkpoint, when a recorder is attached.
    pub artifacts: Option<RunArtifacts>,
}

impl PipelineOutcome {
    pub fn rag_documents(&self) -> Vec<RagDocument> {
        self.placements
            .iter()
            .map(|p| p.rag_document.clone())
            .collect()
    }
}

pub struct Pipeline {
    retriever: Retriever,
    deriver: PlacementDeriver,
    store: Box<dyn ObjectStore>,
    extension: String,
    record_delay: Duration,
    recorder: Option<RunRecorder>,
}

impl Pipeline {
    pub fn new(
        retriever: Retriever,
        deriver: PlacementDeriver,
        store: Box<dyn ObjectStore>,
        extension: &str,
        record_delay: Duration,
    ) -> Self {
        Self {
            retriever,
            deriver,
            store,
            extension: extension.to_string(),
            record_delay,
            recorder: None,
        }
    }

    /// Persist the run after every record.
    pub fn with_recorder(mut self, recorder: RunRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn recorder(&self) -> Option<&RunRecorder> {
        self.recorder.as_ref()
    }

    async fn checkpoint(
        &self,
        log: &RunLog,
        placements: &[StoragePlacement],
        failed: &[ContentRecord],
    ) -> Option<RunArtifacts> {
        let recorder = self.recorder.as_ref()?;
        let documents = placements.iter().map(|p| p.rag_document.clone()).collect();
        match recorder.save(log, documents, failed).await {
            Ok(artifacts) => Some(artifacts),
            Err(e) => {
                warn!("Failed to save run log: {}", e);
                None
            }
        }
    }

    /// Process `records` in order.
    ///
    /// A record's index is its stored sequence index when it has one (a
    /// rerun of failed records), otherwise its 1-based position.
    /// `work_dir` holds retrieved files until they are published; each is
    /// removed once stored.
    pub async fn run<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        records: &[ContentRecord],
        work_dir: &Path,
    ) -> PipelineOutcome {
        let mut log = RunLog::new();
        let mut placements = Vec::new();
        let mut failed = Vec::new();
        let total = records.len();

        for (position, record) in records.iter().enumerate() {
            let index = record.sequence_index.unwrap_or(position + 1);
            let title = record.metadata.display_title().to_string();
            info!("[{}/{}] #{} {}", position + 1, total, index, title);
            ctx.emit(RunEvent::RecordStarted {
                index,
                total,
                title: title.clone(),
            })
            .await;

            match self.process(driver, ctx, record, index, work_dir).await {
                Ok(placement) => {
                    ctx.counters.records_succeeded += 1;
                    log.push(UploadLogEntry::succeeded(&placement));
                    let key = placement.key.clone();
                    placements.push(placement);
                    self.checkpoint(&log, &placements, &failed).await;
                    ctx.emit(RunEvent::RecordCompleted {
                        index,
                        key,
                        summary: log.summary.clone(),
                    })
                    .await;
                }
                Err(source) => {
                    let error = HarvestError::RecordFailure {
                        index,
                        title,
                        source: Box::new(source),
                    };
                    warn!("{}", error);
                    ctx.counters.records_failed += 1;
                    log.push(UploadLogEntry::failed(index, record, &error));
                    failed.push(record.with_sequence_index(index));
                    self.checkpoint(&log, &placements, &failed).await;
                    ctx.emit(RunEvent::RecordFailed {
                        index,
                        error: error.to_string(),
                        summary: log.summary.clone(),
                    })
                    .await;
                }
            }

            info!(
                "Progress: {} ok, {} failed of {}",
                log.summary.successful, log.summary.failed, total
            );

            if position + 1 < total {
                tokio::time::sleep(self.record_delay).await;
            }
        }

        log.finish();
        let artifacts = self.checkpoint(&log, &placements, &failed).await;
        info!(
            "Run finished: {}/{} succeeded ({})",
            log.summary.successful, log.summary.total, log.summary.success_rate
        );
        PipelineOutcome {
            log,
            placements,
            failed,
            artifacts,
        }
    }

    async fn process<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        record: &ContentRecord,
        index: usize,
        work_dir: &Path,
    ) -> Result<StoragePlacement, HarvestError> {
        let target = work_dir.join(format!("{:04}.{}", index, self.extension));
        let asset = self
            .retriever
            .retrieve(driver, ctx, record, index, &target)
            .await?;

        let key = self.deriver.storage_key(record, index);
        let headers = self.deriver.headers(&asset);
        let stored = self.store.put(&key, &asset.bytes, &headers).await;

        // The local copy is no longer needed either way
        let _ = tokio::fs::remove_file(&asset.local_path).await;
        let stored = stored?;

        Ok(self
            .deriver
            .placement(&asset, index, &stored, self.store.bucket()))
    }
}
