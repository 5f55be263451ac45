//! Authenticated retrieval of a record's audio file.
//!
//! Retrieval works the way a person would: open the file link, open the
//! page it came from, click the download control, then watch the download
//! directory until the file lands.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::context::{RunContext, RunEvent};
use crate::error::HarvestError;
use crate::models::{ContentRecord, ResourceRef, RetrievedAsset};
use crate::scrapers::captcha::CaptchaGate;
use crate::scrapers::driver::PageDriver;
use crate::scrapers::selectors::SelectorChain;

/// Suffixes of downloads still in progress.
const PARTIAL_SUFFIXES: &[&str] = &["part", "crdownload", "tmp", "download"];

pub struct Retriever {
    config: RetrievalConfig,
    staging_dir: PathBuf,
    trigger: SelectorChain,
    gate: Option<CaptchaGate>,
}

impl Retriever {
    pub fn new(config: RetrievalConfig, staging_dir: impl Into<PathBuf>, trigger: SelectorChain) -> Self {
        Self {
            config,
            staging_dir: staging_dir.into(),
            trigger,
            gate: None,
        }
    }

    /// Check the source page for challenges before clicking anything.
    pub fn with_gate(mut self, gate: CaptchaGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Retrieve `record` into `target`, retrying the whole sequence.
    pub async fn retrieve<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        record: &ContentRecord,
        index: usize,
        target: &Path,
    ) -> Result<RetrievedAsset, HarvestError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(driver, ctx, record, target).await {
                Ok(asset) => return Ok(asset),
                Err(e) if attempt >= attempts || e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "Attempt {}/{} for record {} failed: {}",
                        attempt, attempts, index, e
                    );
                    ctx.emit(RunEvent::RetryScheduled {
                        index,
                        attempt,
                        error: e.to_string(),
                    })
                    .await;
                    sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        record: &ContentRecord,
        target: &Path,
    ) -> Result<RetrievedAsset, HarvestError> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let before = self.staged_files().await?;

        // Browsers often abort a navigation that turns into a download
        if let Err(e) = driver.navigate(&record.download_url).await {
            debug!("Opening {} directly: {}", record.download_url, e);
        }

        driver
            .navigate(&record.page_url)
            .await
            .map_err(|e| HarvestError::navigation(&record.page_url, e))?;
        if let Some(ref gate) = self.gate {
            gate.guard(&*driver, ctx).await?;
        }

        if self.new_files(&before).await?.is_empty() {
            self.trigger_download(driver, &record.page_url).await?;
        } else {
            debug!("Download already staged, skipping trigger");
        }

        let staged = self.await_staged(&before).await?;
        relocate(&staged, target).await?;
        let bytes = tokio::fs::read(target).await?;
        info!(
            "Retrieved {} ({} bytes)",
            record.metadata.display_title(),
            bytes.len()
        );
        Ok(RetrievedAsset::new(record.clone(), target.to_path_buf(), bytes))
    }

    /// Click the first download control on the page.
    ///
    /// A failed click only counts when nothing at all started downloading;
    /// browsers report an aborted navigation for clicks that turn into one.
    async fn trigger_download<D: PageDriver>(
        &self,
        driver: &mut D,
        page: &ResourceRef,
    ) -> Result<(), HarvestError> {
        let existing = self.staging_entries().await?;
        for rule in self.trigger.rules() {
            let elements = driver.find_all(&rule.css).await.map_err(HarvestError::driver)?;
            let Some(element) = elements.into_iter().next() else {
                continue;
            };
            debug!("Activating download trigger {}", rule);
            if let Err(e) = driver.activate(&element).await {
                if self.staging_entries().await?.is_subset(&existing) {
                    return Err(HarvestError::navigation(page, e));
                }
                debug!("Download trigger navigation: {}", e);
            }
            return Ok(());
        }
        Err(HarvestError::Driver(
            "no download trigger on the source page".to_string(),
        ))
    }

    /// Completed files in the staging directory with the expected extension.
    async fn staged_files(&self) -> Result<HashSet<PathBuf>, HarvestError> {
        let mut files = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.staging_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_complete_download(&path, &self.config.extension) {
                files.insert(path);
            }
        }
        Ok(files)
    }

    /// Every file in the staging directory, partial downloads included.
    async fn staging_entries(&self) -> Result<HashSet<PathBuf>, HarvestError> {
        let mut files = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.staging_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            files.insert(entry.path());
        }
        Ok(files)
    }

    async fn new_files(&self, before: &HashSet<PathBuf>) -> Result<Vec<PathBuf>, HarvestError> {
        let mut files: Vec<PathBuf> = self
            .staged_files()
            .await?
            .into_iter()
            .filter(|p| !before.contains(p))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Poll until a new file appears; reject it if it is too small.
    async fn await_staged(&self, before: &HashSet<PathBuf>) -> Result<PathBuf, HarvestError> {
        let max_wait = Duration::from_secs(self.config.max_wait_secs);
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let started = Instant::now();

        loop {
            if let Some(path) = self.new_files(before).await?.into_iter().next() {
                let size = tokio::fs::metadata(&path).await?.len();
                if size <= self.config.min_file_size {
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(HarvestError::AssetTooSmall {
                        size,
                        minimum: self.config.min_file_size,
                    });
                }
                debug!("Staged {} ({} bytes)", path.display(), size);
                return Ok(path);
            }

            if started.elapsed() >= max_wait {
                return Err(HarvestError::RetrievalTimeout(max_wait));
            }
            sleep(interval).await;
        }
    }
}

fn is_complete_download(path: &Path, extension: &str) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if PARTIAL_SUFFIXES.iter().any(|s| ext.eq_ignore_ascii_case(s)) {
        return false;
    }
    same_file_type(ext, extension) && path.is_file()
}

/// Equal extensions, or extensions of the same media type (`mpga` and `mp3`).
fn same_file_type(ext: &str, expected: &str) -> bool {
    if ext.eq_ignore_ascii_case(expected) {
        return true;
    }
    match (
        mime_guess::from_ext(ext).first_raw(),
        mime_guess::from_ext(expected).first_raw(),
    ) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Move `from` to `to`, copying when they sit on different filesystems.
async fn relocate(from: &Path, to: &Path) -> Result<(), HarvestError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_err() {
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}
