//! Discovery command.

use std::path::Path;

use console::style;
use tokio::sync::mpsc;

use crate::cli::helpers::{with_driver, Runtime};
use crate::cli::progress::spawn_renderer;
use crate::services::DiscoveryService;

/// Crawl every start URL and save the discovered records.
pub async fn cmd_discover(
    runtime: &Runtime,
    output: Option<&Path>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let service = DiscoveryService::from_config(&runtime.config)?;
    runtime.settings.ensure_directories()?;

    let (event_tx, event_rx) = mpsc::channel(100);
    let renderer = spawn_renderer(event_rx);
    let mut ctx = runtime.context(event_tx);

    let (batch, path) = with_driver!(runtime, driver => {
        service
            .discover_and_save(&mut driver, &mut ctx, limit, &runtime.settings.output_dir, output)
            .await
            .map_err(anyhow::Error::from)
    })?;

    let counters = ctx.counters.clone();
    drop(ctx);
    let _ = renderer.await;

    println!(
        "{} Discovered {} records ({} pages, {} failed, {} challenges)",
        style("✓").green(),
        batch.data.len(),
        counters.pages_visited,
        counters.pages_failed,
        counters.challenges
    );
    println!("  Saved to {}", style(path.display()).cyan());
    Ok(())
}
