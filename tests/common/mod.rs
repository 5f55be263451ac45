//! In-memory site and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use audiocrawl::config::{Config, Settings};
use audiocrawl::context::RunContext;
use audiocrawl::models::ResourceRef;
use audiocrawl::scrapers::driver::PageDriver;
use audiocrawl::scrapers::http_client::{FetchedResource, HtmlElement, HtmlPageDriver, PageFetcher};
use audiocrawl::scrapers::selectors::SelectorChain;

pub const BASE: &str = "https://audio.test";

#[derive(Default)]
struct SiteState {
    resources: HashMap<String, (String, Vec<u8>)>,
    failing: HashSet<String>,
    requests: Vec<String>,
}

/// A fake site. Clones share state, so a test can keep a handle while the
/// driver owns another.
#[derive(Clone, Default)]
pub struct MemorySite {
    state: Arc<Mutex<SiteState>>,
}

impl MemorySite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(path: &str) -> String {
        ResourceRef::parse(&format!("{}{}", BASE, path))
            .unwrap()
            .to_string()
    }

    pub fn html(&self, path: &str, body: &str) -> &Self {
        let page = format!("<html><head><title>Lessons</title></head><body>{}</body></html>", body);
        self.state.lock().unwrap().resources.insert(
            Self::url(path),
            ("text/html; charset=utf-8".to_string(), page.into_bytes()),
        );
        self
    }

    pub fn raw_html(&self, path: &str, document: &str) -> &Self {
        self.state.lock().unwrap().resources.insert(
            Self::url(path),
            ("text/html".to_string(), document.as_bytes().to_vec()),
        );
        self
    }

    pub fn audio(&self, path: &str, size: usize) -> &Self {
        self.state
            .lock()
            .unwrap()
            .resources
            .insert(Self::url(path), ("audio/mpeg".to_string(), vec![7u8; size]));
        self
    }

    pub fn fail(&self, path: &str) -> &Self {
        self.state.lock().unwrap().failing.insert(Self::url(path));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        let url = Self::url(path);
        self.requests().iter().filter(|r| **r == url).count()
    }

    pub fn driver(&self) -> HtmlPageDriver<MemorySite> {
        HtmlPageDriver::new(self.clone())
    }

    pub fn driver_with_downloads(&self, dir: &Path) -> HtmlPageDriver<MemorySite> {
        HtmlPageDriver::new(self.clone()).with_download_dir(dir)
    }
}

#[async_trait]
impl PageFetcher for MemorySite {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedResource> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(url.to_string());
        if state.failing.contains(url) {
            anyhow::bail!("HTTP 503 for {}", url);
        }
        match state.resources.get(url) {
            Some((content_type, body)) => Ok(FetchedResource {
                final_url: url.to_string(),
                content_type: content_type.clone(),
                body: body.clone(),
            }),
            None => anyhow::bail!("HTTP 404 for {}", url),
        }
    }
}

/// Static driver shown in a window, where someone solves challenge widgets
/// (elements with class `challenge_class`) after they have been checked
/// `solve_after` times.
pub struct WatchedDriver {
    inner: HtmlPageDriver<MemorySite>,
    challenge_class: String,
    solve_after: usize,
    checks: AtomicUsize,
}

impl WatchedDriver {
    pub fn new(site: &MemorySite, challenge_class: &str, solve_after: usize) -> Self {
        Self {
            inner: site.driver(),
            challenge_class: challenge_class.to_string(),
            solve_after,
            checks: AtomicUsize::new(0),
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageDriver for WatchedDriver {
    type Element = HtmlElement;

    async fn navigate(&mut self, target: &ResourceRef) -> anyhow::Result<()> {
        self.inner.navigate(target).await
    }

    async fn find_all(&self, selector: &str) -> anyhow::Result<Vec<HtmlElement>> {
        self.inner.find_all(selector).await
    }

    async fn text_of(&self, element: &HtmlElement) -> anyhow::Result<Option<String>> {
        self.inner.text_of(element).await
    }

    async fn attribute_of(
        &self,
        element: &HtmlElement,
        name: &str,
    ) -> anyhow::Result<Option<String>> {
        self.inner.attribute_of(element, name).await
    }

    async fn is_visible(&self, element: &HtmlElement) -> anyhow::Result<bool> {
        let is_challenge = element
            .attr("class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == self.challenge_class));
        if is_challenge {
            let seen = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            if seen > self.solve_after {
                return Ok(false);
            }
        }
        self.inner.is_visible(element).await
    }

    async fn activate(&mut self, element: &HtmlElement) -> anyhow::Result<()> {
        self.inner.activate(element).await
    }

    async fn fill(&mut self, element: &HtmlElement, value: &str) -> anyhow::Result<()> {
        self.inner.fill(element, value).await
    }

    async fn current_url(&self) -> anyhow::Result<ResourceRef> {
        self.inner.current_url().await
    }

    async fn title(&self) -> anyhow::Result<String> {
        self.inner.title().await
    }

    async fn body_text(&self) -> anyhow::Result<String> {
        self.inner.body_text().await
    }

    fn has_window(&self) -> bool {
        true
    }
}

pub fn chain(rules: &[&str]) -> SelectorChain {
    SelectorChain::parse(rules).unwrap()
}

/// Config with every delay removed and simple selectors.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.site.base_url = BASE.to_string();
    config.site.start_urls = vec!["/".to_string()];
    config.site.page_delay_ms = 0;

    let selectors = &mut config.site.selectors;
    selectors.show_more = chain(&["a.more@href"]);
    selectors.next_page = chain(&["a[rel='next']"]);
    selectors.leaf_links = chain(&["a.lesson@href"]);
    selectors.download = chain(&["a.download@href"]);
    selectors.download_trigger = chain(&["a.download"]);
    selectors.title = chain(&["h1"]);
    selectors.author = chain(&[".author"]);
    selectors.topics = chain(&[".topics a"]);
    selectors.podcast = chain(&[".podcast"]);
    selectors.synopsis = chain(&[".synopsis"]);

    config.captcha.settle_ms = 0;
    config.captcha.poll_interval_secs = 1;
    config.captcha.max_wait_secs = 3;

    config.retrieval.retry_delay_ms = 0;
    config.retrieval.poll_interval_ms = 10;
    config.retrieval.max_wait_secs = 1;
    config.retrieval.record_delay_ms = 0;
    config
}

pub fn context(config: &Config, data_dir: &Path) -> RunContext {
    RunContext::new(
        Arc::new(config.clone()),
        Settings::with_data_dir(data_dir.to_path_buf()),
    )
    .non_interactive()
}

pub fn lesson_page(title: &str, download: &str) -> String {
    format!(
        r#"<h1>{}</h1>
           <span class="author">Rabbi Yossi Gordon</span>
           <div class="topics"><a>Torah</a><a>Bereishit</a></div>
           <a class="download" href="{}">Download MP3</a>"#,
        title, download
    )
}
