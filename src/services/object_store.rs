//! Object stores that retrieved assets are published to.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::{Settings, StorageBackend, StorageConfig};
use crate::error::HarvestError;

/// Where an object ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub url: String,
    pub key: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` with metadata headers (unprefixed names).
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        headers: &[(String, String)],
    ) -> Result<StoredObject, HarvestError>;

    fn bucket(&self) -> &str;
}

/// Build the configured store.
pub fn from_config(
    config: &StorageConfig,
    settings: &Settings,
    timeout: Duration,
) -> Result<Box<dyn ObjectStore>, HarvestError> {
    match config.backend {
        StorageBackend::Filesystem => Ok(Box::new(FsObjectStore::new(
            settings.storage_root.clone(),
            config.bucket.clone(),
            config.public_url.clone(),
        ))),
        StorageBackend::Http => {
            let endpoint = config.endpoint.clone().ok_or_else(|| {
                HarvestError::FatalConfiguration("storage.endpoint is not set".to_string())
            })?;
            let token = config.token.clone().ok_or_else(|| {
                HarvestError::FatalConfiguration("storage token is not set".to_string())
            })?;
            Ok(Box::new(HttpObjectStore::new(
                &endpoint,
                config.bucket.clone(),
                token,
                config.public_url.clone(),
                config.header_prefix.clone(),
                timeout,
            )?))
        }
    }
}

/// Reject keys that could escape the bucket.
fn check_key(key: &str) -> Result<(), HarvestError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|s| s.is_empty() || s == "." || s == "..")
    {
        return Err(HarvestError::Storage(format!("invalid object key {:?}", key)));
    }
    Ok(())
}

fn join_public(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

/// Stores objects as files under a root directory, with a JSON sidecar
/// holding the metadata headers.
pub struct FsObjectStore {
    root: PathBuf,
    bucket: String,
    public_url: Option<String>,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: String, public_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            bucket,
            public_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Sidecar path for `key`.
    pub fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        headers: &[(String, String)],
    ) -> Result<StoredObject, HarvestError> {
        check_key(key)?;
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        let metadata: serde_json::Map<String, serde_json::Value> = headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        tokio::fs::write(
            self.metadata_path(key),
            serde_json::to_vec_pretty(&metadata)?,
        )
        .await?;

        let url = match self.public_url {
            Some(ref base) => join_public(base, key),
            None => Url::from_file_path(&path)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| path.display().to_string()),
        };
        debug!("Stored {} ({} bytes)", path.display(), bytes.len());
        Ok(StoredObject {
            url,
            key: key.to_string(),
        })
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Uploads with `PUT {endpoint}/{bucket}/{key}` and bearer auth.
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    bucket: String,
    token: String,
    public_url: Option<String>,
    header_prefix: String,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: &str,
        bucket: String,
        token: String,
        public_url: Option<String>,
        header_prefix: String,
        timeout: Duration,
    ) -> Result<Self, HarvestError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            HarvestError::FatalConfiguration(format!("storage.endpoint {:?}: {}", endpoint, e))
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::FatalConfiguration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            bucket,
            token,
            public_url,
            header_prefix,
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        join_public(
            &join_public(self.endpoint.as_str(), &self.bucket),
            key,
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        headers: &[(String, String)],
    ) -> Result<StoredObject, HarvestError> {
        check_key(key)?;
        let url = self.object_url(key);
        let content_type = mime_guess::from_path(key).first_or_octet_stream();

        let mut request = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, content_type.as_ref())
            .body(bytes.to_vec());
        for (name, value) in headers {
            request = request.header(format!("{}{}", self.header_prefix, name), value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HarvestError::Storage(format!("PUT {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarvestError::Storage(format!(
                "PUT {} returned {}: {}",
                url,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        info!("Uploaded {} ({} bytes)", key, bytes.len());
        Ok(StoredObject {
            url: match self.public_url {
                Some(ref base) => join_public(base, key),
                None => url,
            },
            key: key.to_string(),
        })
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_key() {
        assert!(check_key("a/b/0001-x.mp3").is_ok());
        assert!(check_key("").is_err());
        assert!(check_key("/abs").is_err());
        assert!(check_key("a/../b").is_err());
        assert!(check_key("a//b").is_err());
    }

    #[tokio::test]
    async fn test_fs_store_writes_object_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(
            dir.path(),
            "archive".into(),
            Some("https://cdn.example.org/".into()),
        );
        let headers = vec![("title".to_string(), "Lesson".to_string())];
        let stored = store.put("talks/lesson/1/0001-lesson.mp3", b"audio", &headers).await.unwrap();

        assert_eq!(stored.url, "https://cdn.example.org/talks/lesson/1/0001-lesson.mp3");
        assert_eq!(
            std::fs::read(dir.path().join("talks/lesson/1/0001-lesson.mp3")).unwrap(),
            b"audio"
        );
        let sidecar: serde_json::Value = serde_json::from_slice(
            &std::fs::read(store.metadata_path("talks/lesson/1/0001-lesson.mp3")).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar["title"], "Lesson");
    }

    #[tokio::test]
    async fn test_fs_store_file_url_without_public_base() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "archive".into(), None);
        let stored = store.put("a/b.mp3", b"x", &[]).await.unwrap();
        assert!(stored.url.starts_with("file://"));
        assert_eq!(store.bucket(), "archive");
    }

    #[test]
    fn test_http_object_url() {
        let store = HttpObjectStore::new(
            "https://s3.example.org/",
            "archive".into(),
            "token".into(),
            None,
            "x-amz-meta-".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            store.object_url("a/b.mp3"),
            "https://s3.example.org/archive/a/b.mp3"
        );
    }
}
