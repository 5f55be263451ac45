//! Link discovery over "show more" trees and paginated listings.
//!
//! Both strategies walk an explicit worklist, consult the run's ledger before
//! every navigation and pass every loaded page through the challenge gate.
//! A failing page is logged and skipped; its siblings still get visited.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use super::captcha::CaptchaGate;
use super::driver::PageDriver;
use super::extract::Extractor;
use crate::config::{DiscoveryStrategy, SiteConfig};
use crate::context::{RunContext, RunEvent};
use crate::error::HarvestError;
use crate::models::{ContentRecord, ResourceRef};

/// Attributes and classes marking a pagination control as unusable.
const DISABLED_MARKERS: &[&str] = &["disabled", "aria-disabled"];

pub struct Traversal {
    site: SiteConfig,
    base: Url,
    gate: CaptchaGate,
    extractor: Extractor,
}

impl Traversal {
    pub fn new(site: SiteConfig, base: Url, gate: CaptchaGate) -> Self {
        let extractor = Extractor::new(site.selectors.clone(), base.clone());
        Self {
            site,
            base,
            gate,
            extractor,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn page_delay(&self) -> Duration {
        Duration::from_millis(self.site.page_delay_ms)
    }

    /// Navigate to `target` unless the ledger already has it.
    ///
    /// Returns `Ok(false)` for an already-visited resource.
    async fn visit<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        target: &ResourceRef,
        depth: usize,
    ) -> Result<bool, HarvestError> {
        if !ctx.ledger.claim(target) {
            debug!("Already visited {}", target);
            return Ok(false);
        }

        driver
            .navigate(target)
            .await
            .map_err(|e| HarvestError::navigation(target, e))?;
        self.after_load(driver, ctx, depth).await?;
        Ok(true)
    }

    /// Gate, delay and bookkeeping common to every page load.
    async fn after_load<D: PageDriver>(
        &self,
        driver: &D,
        ctx: &mut RunContext,
        depth: usize,
    ) -> Result<(), HarvestError> {
        self.gate.guard(driver, ctx).await?;
        ctx.counters.pages_visited += 1;
        let url = driver
            .current_url()
            .await
            .map(|u| u.to_string())
            .unwrap_or_default();
        ctx.emit(RunEvent::PageVisited { url, depth }).await;
        tokio::time::sleep(self.page_delay()).await;
        Ok(())
    }

    async fn page_failed(&self, ctx: &mut RunContext, url: &ResourceRef, error: &HarvestError) {
        warn!("Skipping {}: {}", url, error);
        ctx.counters.pages_failed += 1;
        ctx.emit(RunEvent::PageFailed {
            url: url.to_string(),
            error: error.to_string(),
        })
        .await;
    }

    /// Absolute leaf-content links on the current page, deduplicated.
    pub async fn leaf_links<D: PageDriver>(&self, driver: &D) -> Vec<ResourceRef> {
        self.resolve_all(self.site.selectors.leaf_links.collect(driver).await)
    }

    fn resolve_all(&self, hrefs: Vec<String>) -> Vec<ResourceRef> {
        let mut seen = HashSet::new();
        hrefs
            .iter()
            .filter_map(|href| ResourceRef::resolve(&self.base, href))
            .filter(|r| seen.insert(r.clone()))
            .collect()
    }

    /// Leaf-content links reachable from `root` with the configured strategy.
    pub async fn discover<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        root: &ResourceRef,
    ) -> Vec<ResourceRef> {
        match self.site.strategy {
            DiscoveryStrategy::Expand => self.expand(driver, ctx, root).await,
            DiscoveryStrategy::Paginate => self.paginate(driver, ctx, root).await,
        }
    }

    /// Depth-first walk of "show more" links.
    ///
    /// Pages with no "show more" link are leaf sections and contribute their
    /// leaf-content links. Children deeper than `max_depth` are not followed.
    pub async fn expand<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        root: &ResourceRef,
    ) -> Vec<ResourceRef> {
        let mut leaves = LinkSet::default();
        let mut stack = vec![(root.clone(), 0usize)];

        while let Some((target, depth)) = stack.pop() {
            match self.visit(driver, ctx, &target, depth).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    self.page_failed(ctx, &target, &e).await;
                    continue;
                }
            }

            let more = self.resolve_all(self.site.selectors.show_more.collect(&*driver).await);
            if more.is_empty() {
                let links = self.leaf_links(&*driver).await;
                info!("Leaf section {} has {} links", target, links.len());
                leaves.extend(links);
                continue;
            }

            if depth >= self.site.max_depth {
                warn!(
                    "Max depth {} reached at {}, not following {} links",
                    self.site.max_depth,
                    target,
                    more.len()
                );
                continue;
            }

            debug!("{} has {} show-more links", target, more.len());
            // Reversed so the first link is visited first
            for child in more.into_iter().rev() {
                if !ctx.ledger.has_visited(&child) {
                    stack.push((child, depth + 1));
                }
            }
        }

        leaves.into_vec()
    }

    /// Follow the enabled "next page" control until there is none.
    pub async fn paginate<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        root: &ResourceRef,
    ) -> Vec<ResourceRef> {
        let mut leaves = LinkSet::default();

        match self.visit(driver, ctx, root, 0).await {
            Ok(true) => {}
            Ok(false) => return Vec::new(),
            Err(e) => {
                self.page_failed(ctx, root, &e).await;
                return Vec::new();
            }
        }

        let mut pages = 1;
        loop {
            let links = self.leaf_links(&*driver).await;
            info!("Page {} has {} links", pages, links.len());
            leaves.extend(links);

            if pages >= self.site.max_pages {
                warn!("Stopping pagination at max pages ({})", self.site.max_pages);
                break;
            }

            let Some(next) = self.enabled_next(&*driver).await else {
                debug!("No enabled next page after page {}", pages);
                break;
            };

            if let Some(href) = driver.attribute_of(&next, "href").await.ok().flatten() {
                if let Some(target) = ResourceRef::resolve(&self.base, &href) {
                    if ctx.ledger.has_visited(&target) {
                        warn!("Next page {} already visited, stopping", target);
                        break;
                    }
                }
            }

            if let Err(e) = driver.activate(&next).await {
                let current = driver.current_url().await.unwrap_or_else(|_| root.clone());
                self.page_failed(ctx, &current, &HarvestError::navigation(&current, e))
                    .await;
                break;
            }

            let current = match driver.current_url().await {
                Ok(url) => url,
                Err(e) => {
                    self.page_failed(ctx, root, &HarvestError::driver(e)).await;
                    break;
                }
            };
            if !ctx.ledger.claim(&current) {
                warn!("Pagination returned to {}, stopping", current);
                break;
            }

            pages += 1;
            if let Err(e) = self.after_load(&*driver, ctx, pages - 1).await {
                self.page_failed(ctx, &current, &e).await;
                break;
            }
        }

        leaves.into_vec()
    }

    /// The first visible, enabled "next page" element.
    async fn enabled_next<D: PageDriver>(&self, driver: &D) -> Option<D::Element> {
        for rule in self.site.selectors.next_page.rules() {
            let Ok(elements) = driver.find_all(&rule.css).await else {
                continue;
            };
            for element in elements {
                if driver.is_visible(&element).await.unwrap_or(false)
                    && !is_disabled(driver, &element).await
                {
                    return Some(element);
                }
            }
        }
        None
    }

    /// Visit each candidate and extract a record.
    ///
    /// A candidate without a download reference is treated as a nested
    /// listing: its leaf links join the worklist. Only the ledger bounds
    /// this, so cycles end but long chains are followed.
    pub async fn harvest<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        candidates: Vec<ResourceRef>,
        limit: Option<usize>,
    ) -> Vec<ContentRecord> {
        let mut records = Vec::new();
        let mut worklist: Vec<(ResourceRef, usize)> =
            candidates.into_iter().rev().map(|c| (c, 1)).collect();

        while let Some((target, depth)) = worklist.pop() {
            if limit.is_some_and(|l| records.len() >= l) {
                break;
            }

            match self.visit(driver, ctx, &target, depth).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    self.page_failed(ctx, &target, &e).await;
                    continue;
                }
            }

            match self.extractor.extract(&*driver, &target).await {
                Some(record) => {
                    info!("Found {}", record.metadata.display_title());
                    ctx.counters.records_discovered += 1;
                    ctx.emit(RunEvent::RecordDiscovered {
                        title: record.metadata.display_title().to_string(),
                        page_url: record.page_url.to_string(),
                    })
                    .await;
                    records.push(record);
                }
                None => {
                    let nested: Vec<ResourceRef> = self
                        .leaf_links(&*driver)
                        .await
                        .into_iter()
                        .filter(|link| !ctx.ledger.has_visited(link))
                        .collect();
                    debug!(
                        "No download on {}, following {} nested links",
                        target,
                        nested.len()
                    );
                    worklist.extend(nested.into_iter().rev().map(|n| (n, depth + 1)));
                }
            }
        }

        records
    }
}

async fn is_disabled<D: PageDriver>(driver: &D, element: &D::Element) -> bool {
    for marker in DISABLED_MARKERS {
        if let Ok(Some(value)) = driver.attribute_of(element, marker).await {
            if !value.eq_ignore_ascii_case("false") {
                return true;
            }
        }
    }
    matches!(
        driver.attribute_of(element, "class").await,
        Ok(Some(class)) if class.split_whitespace().any(|c| c == "disabled")
    )
}

/// Insertion-ordered set of links.
#[derive(Default)]
struct LinkSet {
    seen: HashSet<ResourceRef>,
    links: Vec<ResourceRef>,
}

impl LinkSet {
    fn extend(&mut self, links: impl IntoIterator<Item = ResourceRef>) {
        for link in links {
            if self.seen.insert(link.clone()) {
                self.links.push(link);
            }
        }
    }

    fn into_vec(self) -> Vec<ResourceRef> {
        self.links
    }
}
