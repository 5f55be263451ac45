//! Download reference and metadata extraction from a loaded leaf page.

use tracing::debug;
use url::Url;

use super::driver::PageDriver;
use crate::config::SiteSelectors;
use crate::models::{ContentMetadata, ContentRecord, ResourceRef};

/// Applies the site's selector chains to the current page.
#[derive(Debug, Clone)]
pub struct Extractor {
    selectors: SiteSelectors,
    base: Url,
}

impl Extractor {
    pub fn new(selectors: SiteSelectors, base: Url) -> Self {
        Self { selectors, base }
    }

    /// Resolve the download reference, if any rule finds one.
    pub async fn download_ref<D: PageDriver>(&self, driver: &D) -> Option<ResourceRef> {
        // A rule may match an href that does not resolve (e.g. "#"); keep looking
        for rule in self.selectors.download.rules() {
            let values = match rule.values(driver).await {
                Ok(values) => values,
                Err(e) => {
                    debug!("Download selector {} failed: {}", rule, e);
                    continue;
                }
            };
            if let Some(resolved) = values
                .iter()
                .find_map(|href| ResourceRef::resolve(&self.base, href))
            {
                return Some(resolved);
            }
        }
        None
    }

    /// Metadata fields; each one is optional.
    pub async fn metadata<D: PageDriver>(&self, driver: &D) -> ContentMetadata {
        let title = match self.selectors.title.first(driver).await {
            Some(title) => Some(title),
            None => driver
                .title()
                .await
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        };

        ContentMetadata {
            title,
            author: self.selectors.author.first(driver).await,
            topics: self.selectors.topics.first_all(driver).await,
            podcast: self.selectors.podcast.first(driver).await,
            synopsis: self.selectors.synopsis.first(driver).await,
        }
    }

    /// Build a record for the page at `page`, or `None` when the page has no
    /// download reference and should be treated as a nested listing.
    pub async fn extract<D: PageDriver>(
        &self,
        driver: &D,
        page: &ResourceRef,
    ) -> Option<ContentRecord> {
        let download = self.download_ref(driver).await?;
        let metadata = self.metadata(driver).await;
        debug!(
            "Extracted {} -> {}",
            metadata.display_title(),
            download.as_str()
        );
        Some(ContentRecord::new(page.clone(), download, metadata))
    }
}
