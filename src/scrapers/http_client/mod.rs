//! HTTP session and the static-HTML page driver built on it.

mod page;
mod user_agent;

pub use page::{HtmlElement, HtmlPageDriver};
pub use user_agent::{resolve_user_agent, USER_AGENT};

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// A fetched resource, HTML or otherwise.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// URL after redirects.
    pub final_url: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl FetchedResource {
    pub fn is_html(&self) -> bool {
        let ct = self.content_type.to_ascii_lowercase();
        ct.starts_with("text/html") || ct.starts_with("application/xhtml")
    }
}

/// Source of raw resources for [`HtmlPageDriver`].
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedResource>;
}

/// Cookie-keeping HTTP session.
///
/// Cookies set by any response are replayed on later requests, so a login
/// performed through this client carries over to downloads.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new HTTP session.
    /// - None: Use default audiocrawl user agent
    /// - Some("impersonate"): Use random real browser user agent
    /// - Some(custom): Use custom user agent string
    pub fn new(timeout: Duration, user_agent_config: Option<&str>) -> anyhow::Result<Self> {
        let user_agent = resolve_user_agent(user_agent_config);
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedResource> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} for {}", status.as_u16(), url);
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?
            .to_vec();

        Ok(FetchedResource {
            final_url,
            content_type,
            body,
        })
    }
}
