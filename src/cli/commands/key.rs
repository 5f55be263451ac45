//! Print the derived storage key for a page and title.

use crate::cli::helpers::Runtime;
use crate::models::{ContentMetadata, ContentRecord, ResourceRef};
use crate::services::PlacementDeriver;

pub fn cmd_key(runtime: &Runtime, page_url: &str, title: &str, index: usize) -> anyhow::Result<()> {
    let base = runtime.config.site.base()?;
    let page = ResourceRef::resolve(&base, page_url)
        .ok_or_else(|| anyhow::anyhow!("Invalid page URL: {}", page_url))?;
    let record = ContentRecord::new(
        page.clone(),
        page,
        ContentMetadata {
            title: Some(title.to_string()),
            ..Default::default()
        },
    );

    let deriver = PlacementDeriver::new(&runtime.config.storage, &runtime.config.retrieval.extension);
    println!("{}", deriver.storage_key(&record, index.max(1)));
    Ok(())
}
