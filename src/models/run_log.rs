//! Per-run upload log with success accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ContentRecord, StoragePlacement};

/// One processed record, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLogEntry {
    pub index: usize,
    pub success: bool,
    pub title: Option<String>,
    pub page_url: String,
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl UploadLogEntry {
    pub fn succeeded(placement: &StoragePlacement) -> Self {
        Self {
            index: placement.index,
            success: true,
            title: placement.record.metadata.title.clone(),
            page_url: placement.record.page_url.to_string(),
            download_url: placement.record.download_url.to_string(),
            key: Some(placement.key.clone()),
            url: Some(placement.rag_document.file.url.clone()),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(index: usize, record: &ContentRecord, error: impl ToString) -> Self {
        Self {
            index,
            success: false,
            title: record.metadata.title.clone(),
            page_url: record.page_url.to_string(),
            download_url: record.download_url.to_string(),
            key: None,
            url: None,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Counts and success rate over a set of log entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage with two decimals, e.g. `"66.67%"`.
    pub success_rate: String,
}

impl RunSummary {
    pub fn from_counts(successful: usize, failed: usize) -> Self {
        let total = successful + failed;
        let rate = if total == 0 {
            0.0
        } else {
            successful as f64 * 100.0 / total as f64
        };
        Self {
            total,
            successful,
            failed,
            success_rate: format!("{:.2}%", rate),
        }
    }
}

/// Append-only log for one retrieval run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: RunSummary,
    pub entries: Vec<UploadLogEntry>,
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            summary: RunSummary::from_counts(0, 0),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: UploadLogEntry) {
        self.entries.push(entry);
        self.summary = self.compute_summary();
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.summary = self.compute_summary();
    }

    fn compute_summary(&self) -> RunSummary {
        let successful = self.entries.iter().filter(|e| e.success).count();
        RunSummary::from_counts(successful, self.entries.len() - successful)
    }

    pub fn failed_entries(&self) -> impl Iterator<Item = &UploadLogEntry> {
        self.entries.iter().filter(|e| !e.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceRef;

    fn record() -> ContentRecord {
        ContentRecord::new(
            ResourceRef::parse("https://a.org/p").unwrap(),
            ResourceRef::parse("https://a.org/p.mp3").unwrap(),
            Default::default(),
        )
    }

    #[test]
    fn test_summary_rate_two_decimals() {
        let summary = RunSummary::from_counts(2, 1);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.success_rate, "66.67%");
    }

    #[test]
    fn test_summary_empty_run() {
        assert_eq!(RunSummary::from_counts(0, 0).success_rate, "0.00%");
    }

    #[test]
    fn test_log_tracks_failures() {
        let mut log = RunLog::new();
        log.push(UploadLogEntry::failed(1, &record(), "boom"));
        assert_eq!(log.summary.failed, 1);
        assert_eq!(log.failed_entries().count(), 1);
        log.finish();
        assert!(log.finished_at.is_some());
    }
}
