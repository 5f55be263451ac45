//! Discovery phase: traverse every start URL and extract records.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::artifacts;
use crate::config::Config;
use crate::context::RunContext;
use crate::error::HarvestError;
use crate::models::{RecordBatch, ResourceRef};
use crate::scrapers::captcha::CaptchaGate;
use crate::scrapers::driver::PageDriver;
use crate::scrapers::traversal::Traversal;

pub struct DiscoveryService {
    traversal: Traversal,
    roots: Vec<ResourceRef>,
}

impl DiscoveryService {
    pub fn new(traversal: Traversal, roots: Vec<ResourceRef>) -> Self {
        Self { traversal, roots }
    }

    /// Validate the site section and resolve the start URLs.
    pub fn from_config(config: &Config) -> Result<Self, HarvestError> {
        config.validate_for_discovery()?;
        let base = config.site.base()?;
        let roots = config
            .site
            .start_urls
            .iter()
            .map(|raw| {
                ResourceRef::resolve(&base, raw).ok_or_else(|| {
                    HarvestError::FatalConfiguration(format!("start URL {:?} is not valid", raw))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let traversal = Traversal::new(
            config.site.clone(),
            base,
            CaptchaGate::new(config.captcha.clone()),
        );
        Ok(Self::new(traversal, roots))
    }

    pub fn roots(&self) -> &[ResourceRef] {
        &self.roots
    }

    /// Discover records from every root, stopping early once `limit` is hit.
    pub async fn discover<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        limit: Option<usize>,
    ) -> RecordBatch {
        let mut records = Vec::new();

        for root in &self.roots {
            let remaining = limit.map(|l| l.saturating_sub(records.len()));
            if remaining == Some(0) {
                break;
            }

            info!("Discovering from {}", root);
            let candidates = self.traversal.discover(driver, ctx, root).await;
            if candidates.is_empty() {
                warn!("No content links found from {}", root);
                continue;
            }
            info!("{} candidate pages from {}", candidates.len(), root);

            let found = self
                .traversal
                .harvest(driver, ctx, candidates, remaining)
                .await;
            info!("{} records from {}", found.len(), root);
            records.extend(found);
        }

        info!(
            "Discovery finished: {} records, {} pages visited, {} failed",
            records.len(),
            ctx.counters.pages_visited,
            ctx.counters.pages_failed
        );
        RecordBatch::new(records)
    }

    /// Discover and write the batch to `output` (or a timestamped file in
    /// `dir`) before anything downstream gets a chance to fail.
    pub async fn discover_and_save<D: PageDriver>(
        &self,
        driver: &mut D,
        ctx: &mut RunContext,
        limit: Option<usize>,
        dir: &Path,
        output: Option<&Path>,
    ) -> Result<(RecordBatch, PathBuf), HarvestError> {
        let batch = self.discover(driver, ctx, limit).await;
        let path = artifacts::save_discovery(dir, output, &batch).await?;
        Ok((batch, path))
    }
}
