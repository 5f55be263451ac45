//! Storage key and metadata derivation.
//!
//! Everything here is a pure function of a record and its 1-based sequence
//! index, so replaying the same input order reproduces the same keys.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::object_store::StoredObject;
use crate::config::{ContentTypeRule, StorageConfig};
use crate::models::{
    ContentRecord, RagContent, RagDocument, RagFile, RagSearch, RagSource, ResourceRef,
    RetrievedAsset, StoragePlacement,
};

static CONTENT_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/aid/(\d+)/").unwrap());

/// Classification used when no rule matches.
pub const DEFAULT_CONTENT_TYPE: &str = "other";
/// Content id used when the page URL carries none.
pub const UNKNOWN_CONTENT_ID: &str = "unknown";
/// Header values longer than this are cut.
pub const MAX_HEADER_LEN: usize = 1024;

const TITLE_SEGMENT_LEN: usize = 80;
const TITLE_FILENAME_LEN: usize = 100;

/// First rule whose pattern occurs in the page URL.
pub fn classify<'a>(page: &ResourceRef, rules: &'a [ContentTypeRule]) -> &'a str {
    rules
        .iter()
        .find(|rule| page.as_str().contains(&rule.pattern))
        .map(|rule| rule.name.as_str())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Numeric id from an `/aid/<digits>/` path segment.
pub fn content_id(page: &ResourceRef) -> String {
    CONTENT_ID
        .captures(page.as_str())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_CONTENT_ID.to_string())
}

/// Lowercase, hyphenated, truncated form of a title for use in keys.
///
/// Whitespace runs collapse to one hyphen and leading or trailing
/// whitespace is dropped, so `" Bereishit! "` becomes `bereishit`, not
/// `-bereishit-`.
pub fn sanitize_title(title: &str, max_len: usize) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    let hyphenated = kept.split_whitespace().collect::<Vec<_>>().join("-");
    let truncated: String = hyphenated.to_lowercase().chars().take(max_len).collect();
    if truncated.is_empty() {
        "untitled".to_string()
    } else {
        truncated
    }
}

/// Printable ASCII only, trimmed, at most [`MAX_HEADER_LEN`] characters.
pub fn sanitize_header_value(value: &str) -> String {
    let printable: String = value.chars().filter(|c| matches!(c, ' '..='~')).collect();
    printable.trim().chars().take(MAX_HEADER_LEN).collect::<String>().trim_end().to_string()
}

/// `{type}/{title}/{id}/{index:04}-{title}.{ext}`.
pub fn derive_storage_key(
    record: &ContentRecord,
    index: usize,
    rules: &[ContentTypeRule],
    extension: &str,
) -> String {
    let title = record.metadata.title.as_deref().unwrap_or_default();
    format!(
        "{}/{}/{}/{:04}-{}.{}",
        classify(&record.page_url, rules),
        sanitize_title(title, TITLE_SEGMENT_LEN),
        content_id(&record.page_url),
        index,
        sanitize_title(title, TITLE_FILENAME_LEN),
        extension
    )
}

/// Derives keys, headers and RAG documents with the configured rules.
#[derive(Debug, Clone)]
pub struct PlacementDeriver {
    rules: Vec<ContentTypeRule>,
    document_prefix: String,
    extension: String,
}

impl PlacementDeriver {
    pub fn new(storage: &StorageConfig, extension: &str) -> Self {
        Self {
            rules: storage.content_types.clone(),
            document_prefix: storage.document_prefix.clone(),
            extension: extension.to_string(),
        }
    }

    pub fn storage_key(&self, record: &ContentRecord, index: usize) -> String {
        derive_storage_key(record, index, &self.rules, &self.extension)
    }

    /// Object metadata headers, sanitized, empty values dropped.
    pub fn headers(&self, asset: &RetrievedAsset) -> Vec<(String, String)> {
        let record = &asset.record;
        let metadata = &record.metadata;
        let topics = metadata.topics.join(", ");
        let id = content_id(&record.page_url);
        let digest = asset.sha256();
        let fields = [
            ("title", metadata.title.as_deref()),
            ("author", metadata.author.as_deref()),
            ("topics", Some(topics.as_str())),
            ("podcast", metadata.podcast.as_deref()),
            ("source-url", Some(record.page_url.as_str())),
            ("content-id", Some(id.as_str())),
            ("sha256", Some(digest.as_str())),
        ];
        fields
            .into_iter()
            .filter_map(|(name, value)| {
                let value = sanitize_header_value(value?);
                (!value.is_empty()).then(|| (name.to_string(), value))
            })
            .collect()
    }

    pub fn rag_document(
        &self,
        asset: &RetrievedAsset,
        index: usize,
        stored: &StoredObject,
        bucket: &str,
        uploaded_at: DateTime<Utc>,
    ) -> RagDocument {
        let record = &asset.record;
        let metadata = &record.metadata;
        let title = metadata.display_title().to_string();

        let description = metadata
            .synopsis
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| match metadata.author {
                Some(ref author) => format!("{} by {}", title, author),
                None => title.clone(),
            });

        let mut search = vec![title.clone()];
        search.extend(metadata.author.clone());
        search.extend(metadata.topics.iter().cloned());

        RagDocument {
            id: format!("{}-{:04}", self.document_prefix, index),
            content: RagContent {
                title,
                author: metadata.author.clone(),
                topics: metadata.topics.clone(),
                podcast: metadata.podcast.clone(),
                description,
                content_type: classify(&record.page_url, &self.rules).to_string(),
                content_id: content_id(&record.page_url),
            },
            file: RagFile {
                bucket: bucket.to_string(),
                key: stored.key.clone(),
                url: stored.url.clone(),
                mime_type: mime_guess::from_path(&stored.key)
                    .first_or_octet_stream()
                    .to_string(),
                size: asset.byte_length,
                sha256: asset.sha256(),
            },
            source: RagSource {
                original_url: record.page_url.to_string(),
                download_url: record.download_url.to_string(),
                scraped_at: record.scraped_at,
                uploaded_at,
            },
            search: RagSearch {
                text: search.join(" ").to_lowercase(),
            },
        }
    }

    pub fn placement(
        &self,
        asset: &RetrievedAsset,
        index: usize,
        stored: &StoredObject,
        bucket: &str,
    ) -> StoragePlacement {
        StoragePlacement {
            index,
            key: stored.key.clone(),
            record: asset.record.clone(),
            rag_document: self.rag_document(asset, index, stored, bucket, Utc::now()),
        }
    }
}
