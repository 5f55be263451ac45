//! Discovered content records and retrieved assets.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ResourceRef;

/// Descriptive fields scraped from a leaf page. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Ordered as they appear on the page.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podcast: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
}

impl ContentMetadata {
    /// Title or a placeholder, for log lines.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(untitled)")
    }
}

/// One discovered piece of content, prior to retrieval.
///
/// Created once by the extractor and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    /// Page the download reference was found on.
    #[serde(alias = "url", alias = "sourcePageRef")]
    pub page_url: ResourceRef,
    /// Resolved download URL.
    #[serde(alias = "mp3Url", alias = "downloadRef")]
    pub download_url: ResourceRef,
    #[serde(flatten)]
    pub metadata: ContentMetadata,
    #[serde(alias = "discoveredAt", default = "Utc::now")]
    pub scraped_at: DateTime<Utc>,
    /// Index assigned by the run that first processed the record. Set on
    /// failed records so a rerun derives the same storage keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_index: Option<usize>,
}

impl ContentRecord {
    pub fn new(page_url: ResourceRef, download_url: ResourceRef, metadata: ContentMetadata) -> Self {
        Self {
            page_url,
            download_url,
            metadata,
            scraped_at: Utc::now(),
            sequence_index: None,
        }
    }

    /// Copy carrying `index` for later reruns.
    pub fn with_sequence_index(&self, index: usize) -> Self {
        Self {
            sequence_index: Some(index),
            ..self.clone()
        }
    }
}

/// A record plus fetched bytes that passed the minimum-size check.
#[derive(Debug, Clone)]
pub struct RetrievedAsset {
    pub record: ContentRecord,
    pub local_path: PathBuf,
    pub bytes: Vec<u8>,
    pub byte_length: u64,
}

impl RetrievedAsset {
    pub fn new(record: ContentRecord, local_path: PathBuf, bytes: Vec<u8>) -> Self {
        let byte_length = bytes.len() as u64;
        Self {
            record,
            local_path,
            bytes,
            byte_length,
        }
    }

    /// SHA-256 of the asset bytes, hex encoded.
    pub fn sha256(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }
}
