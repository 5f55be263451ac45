//! Storage placement and the search-oriented document describing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ContentRecord;

/// Final placement of one retrieved asset in the object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePlacement {
    pub index: usize,
    pub key: String,
    pub record: ContentRecord,
    pub rag_document: RagDocument,
}

/// Metadata document suitable for indexing in a retrieval pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagDocument {
    /// `{prefix}-{zero padded index}`.
    pub id: String,
    pub content: RagContent,
    pub file: RagFile,
    pub source: RagSource,
    pub search: RagSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagContent {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podcast: Option<String>,
    pub description: String,
    pub content_type: String,
    pub content_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagFile {
    pub bucket: String,
    pub key: String,
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagSource {
    pub original_url: String,
    pub download_url: String,
    pub scraped_at: DateTime<Utc>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagSearch {
    /// Lower-cased title, author and topics joined with spaces.
    pub text: String,
}
