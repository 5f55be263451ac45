//! Record collections exchanged between discovery and retrieval passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ContentRecord;

/// Discovery output and retrieval input.
///
/// The chunk fields are informational; they never change how records are
/// processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordBatch {
    pub data: Vec<ContentRecord>,
    #[serde(default = "Utc::now")]
    pub scraped_at: DateTime<Utc>,
    #[serde(default)]
    pub total_records: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_number: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<usize>,
}

impl RecordBatch {
    pub fn new(data: Vec<ContentRecord>) -> Self {
        Self {
            total_records: data.len(),
            data,
            scraped_at: Utc::now(),
            chunk_number: None,
            total_chunks: None,
            start_index: None,
            end_index: None,
        }
    }

    /// Split into batches of at most `chunk_size` records.
    ///
    /// `start_index`/`end_index` are zero-based positions in the original
    /// batch (end exclusive).
    pub fn into_chunks(self, chunk_size: usize) -> Vec<RecordBatch> {
        let chunk_size = chunk_size.max(1);
        let total_chunks = self.data.len().div_ceil(chunk_size);
        let scraped_at = self.scraped_at;

        self.data
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| {
                let start = i * chunk_size;
                RecordBatch {
                    data: chunk.to_vec(),
                    scraped_at,
                    total_records: chunk.len(),
                    chunk_number: Some(i + 1),
                    total_chunks: Some(total_chunks),
                    start_index: Some(start),
                    end_index: Some(start + chunk.len()),
                }
            })
            .collect()
    }
}
