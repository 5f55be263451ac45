//! Configuration management for audiocrawl using the prefer crate.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::HarvestError;
use crate::scrapers::browser::BrowserEngineConfig;
use crate::scrapers::selectors::SelectorChain;

/// Default data directory name under the user's documents folder.
const DATA_SUBDIR: &str = "audiocrawl";

/// Environment variables consulted at startup.
pub const ENV_USERNAME: &str = "AUDIOCRAWL_USERNAME";
pub const ENV_PASSWORD: &str = "AUDIOCRAWL_PASSWORD";
pub const ENV_STORAGE_TOKEN: &str = "AUDIOCRAWL_STORAGE_TOKEN";

/// Which page driver backs the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Headless Chromium (requires the `browser` feature)
    #[default]
    Browser,
    /// Plain HTTP with static HTML parsing
    Http,
}

/// Shape of the site section being crawled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStrategy {
    /// Follow "show more" links depth-first until leaf sections
    #[default]
    Expand,
    /// Follow an enabled "next page" control
    Paginate,
}

/// Selector chains describing the site's markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSelectors {
    pub show_more: SelectorChain,
    pub next_page: SelectorChain,
    pub leaf_links: SelectorChain,
    pub download: SelectorChain,
    pub download_trigger: SelectorChain,
    pub title: SelectorChain,
    pub author: SelectorChain,
    pub topics: SelectorChain,
    pub podcast: SelectorChain,
    pub synopsis: SelectorChain,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            show_more: ["a.show_more@href", "a.more_link@href", "a[title='Show More']@href"]
                .into_iter()
                .collect(),
            next_page: ["a[rel='next']", ".pagination a.next", "a.next_page"]
                .into_iter()
                .collect(),
            leaf_links: [
                "a[href*='/multimedia/media_cdo/aid/']@href",
                "a[href*='/multimedia/video_cdo/aid/']@href",
                "a[href*='/multimedia/audio_cdo/aid/']@href",
                ".media_item a@href",
            ]
            .into_iter()
            .collect(),
            download: [
                "a[href$='.mp3']@href",
                "a.download@href",
                "audio source@src",
                "audio@src",
            ]
            .into_iter()
            .collect(),
            download_trigger: ["a[href$='.mp3']", "a.download", "a[download]"]
                .into_iter()
                .collect(),
            title: ["h1", "meta[property='og:title']@content"]
                .into_iter()
                .collect(),
            author: [".author a", ".author", "meta[name='author']@content"]
                .into_iter()
                .collect(),
            topics: [".topics a", ".tags a"].into_iter().collect(),
            podcast: [".podcast_title", ".series a"].into_iter().collect(),
            synopsis: [".synopsis", "meta[name='description']@content"]
                .into_iter()
                .collect(),
        }
    }
}

/// What to crawl and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Base for resolving relative links.
    pub base_url: String,
    /// Traversal roots, absolute or relative to `base_url`.
    pub start_urls: Vec<String>,
    pub strategy: DiscoveryStrategy,
    /// Deepest "show more" level followed by the expand strategy.
    pub max_depth: usize,
    /// Safety valve for the pagination strategy.
    pub max_pages: usize,
    /// Delay after each page load in milliseconds.
    pub page_delay_ms: u64,
    pub selectors: SiteSelectors,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.chabad.org".to_string(),
            start_urls: Vec::new(),
            strategy: DiscoveryStrategy::default(),
            max_depth: 10,
            max_pages: 50,
            page_delay_ms: 1500,
            selectors: SiteSelectors::default(),
        }
    }
}

impl SiteConfig {
    pub fn base(&self) -> Result<Url, HarvestError> {
        Url::parse(&self.base_url).map_err(|e| {
            HarvestError::FatalConfiguration(format!(
                "site.base_url {:?} is not a valid URL: {}",
                self.base_url, e
            ))
        })
    }
}

/// Challenge detection and human wait policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptchaConfig {
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    /// Pause after a challenge clears before resuming.
    pub settle_ms: u64,
    pub progress_interval_secs: u64,
    /// CSS selectors of challenge widgets; only visible matches count.
    pub selectors: Vec<String>,
    pub title_phrases: Vec<String>,
    pub url_phrases: Vec<String>,
    pub body_phrases: Vec<String>,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3,
            max_wait_secs: 180,
            settle_ms: 2000,
            progress_interval_secs: 15,
            selectors: vec![
                "iframe[src*='recaptcha']".to_string(),
                "iframe[src*='hcaptcha']".to_string(),
                "iframe[src*='challenges.cloudflare.com']".to_string(),
                ".g-recaptcha".to_string(),
                ".h-captcha".to_string(),
                "#challenge-form".to_string(),
                "#px-captcha".to_string(),
            ],
            title_phrases: vec![
                "just a moment".to_string(),
                "attention required".to_string(),
                "captcha".to_string(),
                "security check".to_string(),
                "access denied".to_string(),
            ],
            url_phrases: vec![
                "/cdn-cgi/challenge".to_string(),
                "captcha".to_string(),
                "__cf_chl".to_string(),
            ],
            body_phrases: vec![
                "verify you are human".to_string(),
                "verifying you are human".to_string(),
                "checking your browser".to_string(),
                "are you a robot".to_string(),
                "press and hold".to_string(),
                "complete the security check".to_string(),
            ],
        }
    }
}

/// Download retry and staging policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
    /// Files at or below this size are error pages, not content.
    pub min_file_size: u64,
    /// Extension of staged files to accept.
    pub extension: String,
    /// Delay between records in milliseconds.
    pub record_delay_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 3000,
            poll_interval_ms: 2000,
            max_wait_secs: 120,
            min_file_size: 1000,
            extension: "mp3".to_string(),
            record_delay_ms: 2000,
        }
    }
}

/// Login form description. Absent means the site needs no login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub login_url: String,
    #[serde(default = "default_username_selector")]
    pub username_selector: String,
    #[serde(default = "default_password_selector")]
    pub password_selector: String,
    #[serde(default = "default_submit_selector")]
    pub submit_selector: String,
    /// Visible when logged in.
    #[serde(default)]
    pub logged_in_selectors: Vec<String>,
    /// Visible when logged out.
    #[serde(default)]
    pub logged_out_selectors: Vec<String>,
    #[serde(default, skip_serializing)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

fn default_username_selector() -> String {
    "input[type='email'], input[name='username'], input[name='email']".to_string()
}

fn default_password_selector() -> String {
    "input[type='password']".to_string()
}

fn default_submit_selector() -> String {
    "button[type='submit'], input[type='submit']".to_string()
}

/// Object store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Local directory tree.
    #[default]
    Filesystem,
    /// HTTP PUT to an S3-compatible endpoint.
    Http,
}

/// Maps a URL path substring to a content-type bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeRule {
    pub pattern: String,
    pub name: String,
}

impl ContentTypeRule {
    pub fn new(pattern: &str, name: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            name: name.to_string(),
        }
    }
}

pub fn default_content_types() -> Vec<ContentTypeRule> {
    vec![
        ContentTypeRule::new("/multimedia/video_cdo/", "rabbi-gordon"),
        ContentTypeRule::new("/multimedia/audio_cdo/", "audio-classes"),
        ContentTypeRule::new("/multimedia/media_cdo/", "media"),
        ContentTypeRule::new("/podcast", "podcasts"),
        ContentTypeRule::new("/library/", "library"),
    ]
}

/// Where and how assets are published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    /// Filesystem root (filesystem backend).
    pub root: Option<String>,
    /// Service endpoint (http backend).
    pub endpoint: Option<String>,
    /// Public base URL for object links.
    pub public_url: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub header_prefix: String,
    /// Prefix of RAG document ids.
    pub document_prefix: String,
    /// Ordered; first matching rule names the key's top-level bucket.
    pub content_types: Vec<ContentTypeRule>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: "audio-archive".to_string(),
            root: None,
            endpoint: None,
            public_url: None,
            token: None,
            header_prefix: "x-amz-meta-".to_string(),
            document_prefix: "audio".to_string(),
            content_types: default_content_types(),
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Output directory for run artifacts (default: `{data_dir}/output`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// Staging directory for browser downloads (default: `{data_dir}/downloads`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads_dir: Option<String>,
    /// User agent for the HTTP driver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    pub driver: DriverKind,
    pub site: SiteConfig,
    pub captcha: CaptchaConfig,
    pub retrieval: RetrievalConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    pub storage: StorageConfig,
    pub browser: BrowserEngineConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration, discovering the file with prefer unless a path
    /// is given.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, HarvestError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path)
                .await
                .map_err(HarvestError::FatalConfiguration);
        }

        match prefer::load("audiocrawl").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => Ok(config),
                    Err(e) => {
                        warn!("Ignoring config at {}: {}", path.display(), e);
                        Ok(Self::default().with_env_overrides())
                    }
                },
                None => Ok(Self::default().with_env_overrides()),
            },
            // No config file found, use defaults with env overrides
            Err(_) => Ok(Self::default().with_env_overrides()),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML, and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    /// Parse configuration text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, String> {
        match ext {
            "json" => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => toml::from_str(contents).map_err(|e| format!("Failed to parse TOML config: {}", e)),
        }
    }

    /// Apply secrets and endpoints from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        self.browser = self.browser.with_env_overrides();
        if let Some(ref mut auth) = self.auth {
            if let Ok(username) = std::env::var(ENV_USERNAME) {
                auth.username = Some(username);
            }
            if let Ok(password) = std::env::var(ENV_PASSWORD) {
                auth.password = Some(password);
            }
        }
        if let Ok(token) = std::env::var(ENV_STORAGE_TOKEN) {
            self.storage.token = Some(token);
        }
        self
    }

    /// Directory relative paths resolve against.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    /// Resolve directories into [`Settings`].
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        if let Some(ref data_dir) = self.data_dir {
            settings = Settings::with_data_dir(self.resolve_path(data_dir));
        }
        if let Some(ref output_dir) = self.output_dir {
            settings.output_dir = self.resolve_path(output_dir);
        }
        if let Some(ref downloads_dir) = self.downloads_dir {
            settings.downloads_dir = self.resolve_path(downloads_dir);
        }
        if let Some(ref root) = self.storage.root {
            settings.storage_root = self.resolve_path(root);
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        settings.user_agent = self.user_agent.clone();
        settings
    }

    /// Check everything a discovery pass needs.
    pub fn validate_for_discovery(&self) -> Result<(), HarvestError> {
        self.site.base()?;
        if self.site.start_urls.is_empty() {
            return Err(HarvestError::FatalConfiguration(
                "site.start_urls is empty".to_string(),
            ));
        }
        if self.site.selectors.leaf_links.is_empty() {
            return Err(HarvestError::FatalConfiguration(
                "site.selectors.leaf_links is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Check everything a retrieval pass needs.
    pub fn validate_for_retrieval(&self) -> Result<(), HarvestError> {
        self.site.base()?;
        if self.retrieval.retry_attempts == 0 {
            return Err(HarvestError::FatalConfiguration(
                "retrieval.retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(HarvestError::FatalConfiguration(
                "storage.bucket is empty".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Http {
            let missing: Vec<&str> = [
                ("storage.endpoint", self.storage.endpoint.is_none()),
                (ENV_STORAGE_TOKEN, self.storage.token.is_none()),
            ]
            .iter()
            .filter(|(_, missing)| *missing)
            .map(|(name, _)| *name)
            .collect();
            if !missing.is_empty() {
                return Err(HarvestError::FatalConfiguration(format!(
                    "HTTP storage requires {}",
                    missing.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Run artifacts (discovery output, run logs, RAG documents).
    pub output_dir: PathBuf,
    /// Where the driver drops downloaded files.
    pub downloads_dir: PathBuf,
    /// Root of the filesystem object store.
    pub storage_root: PathBuf,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    pub user_agent: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        // Documents dir -> Home dir -> Current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DATA_SUBDIR);
        Self::with_data_dir(data_dir)
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            output_dir: data_dir.join("output"),
            downloads_dir: data_dir.join("downloads"),
            storage_root: data_dir.join("store"),
            data_dir,
            request_timeout: 30,
            user_agent: None,
        }
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            &self.data_dir,
            &self.output_dir,
            &self.downloads_dir,
            &self.storage_root,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory '{}': {}", dir.display(), e),
                )
            })?;
        }
        Ok(())
    }
}
