//! Retrieval commands: process a discovery file, or discover and retrieve
//! in one session.

use std::path::Path;

use anyhow::Context;
use console::style;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::helpers::{with_driver, Runtime};
use crate::cli::progress::spawn_renderer;
use crate::context::RunContext;
use crate::models::ContentRecord;
use crate::scrapers::driver::PageDriver;
use crate::services::artifacts::{self, RunArtifacts};
use crate::services::{establish_session, ConsoleOperator, DiscoveryService};
use crate::services::{Pipeline, PipelineOutcome};

/// Log in, then run every record through the pipeline.
///
/// Returns `None` when the operator interrupts the run; everything that
/// finished is already on disk by then.
async fn retrieve_records<D: PageDriver>(
    runtime: &Runtime,
    pipeline: &Pipeline,
    driver: &mut D,
    ctx: &mut RunContext,
    records: &[ContentRecord],
) -> anyhow::Result<Option<PipelineOutcome>> {
    let authenticator = runtime.authenticator::<D>()?;
    let credentials = runtime.credentials();
    let operator = ConsoleOperator;
    let session = establish_session(
        authenticator.as_ref(),
        driver,
        ctx,
        credentials.as_ref(),
        Some(&operator),
    )
    .await?;
    info!("Session ready ({:?}, {:?})", session.method, session.status);

    let work_dir = tempfile::Builder::new()
        .prefix("audiocrawl-")
        .tempdir_in(&runtime.settings.data_dir)?;

    tokio::select! {
        outcome = pipeline.run(driver, ctx, records, work_dir.path()) => Ok(Some(outcome)),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping after the last completed record");
            Ok(None)
        }
    }
}

/// Retrieve and publish the records in `input`.
pub async fn cmd_retrieve(
    runtime: &Runtime,
    input: &Path,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let pipeline = runtime.pipeline()?;
    runtime.settings.ensure_directories()?;

    let mut batch = artifacts::read_batch(input).await?;
    if let Some(limit) = limit {
        batch.data.truncate(limit);
    }
    if batch.data.is_empty() {
        println!("{} No records in {}", style("!").yellow(), input.display());
        return Ok(());
    }

    let (event_tx, event_rx) = mpsc::channel(100);
    let renderer = spawn_renderer(event_rx);
    let mut ctx = runtime.context(event_tx);

    let outcome = with_driver!(runtime, driver => {
        retrieve_records(runtime, &pipeline, &mut driver, &mut ctx, &batch.data).await
    })?;

    drop(ctx);
    let _ = renderer.await;
    finish(runtime, &pipeline, outcome).await
}

/// Discover and retrieve in one process, sharing the session and ledger.
pub async fn cmd_run(runtime: &Runtime, limit: Option<usize>) -> anyhow::Result<()> {
    let service = DiscoveryService::from_config(&runtime.config)?;
    let pipeline = runtime.pipeline()?;
    runtime.settings.ensure_directories()?;

    let (event_tx, event_rx) = mpsc::channel(100);
    let renderer = spawn_renderer(event_rx);
    let mut ctx = runtime.context(event_tx);

    let (batch, path, outcome) = with_driver!(runtime, driver => {
        async {
            let (batch, path) = service
                .discover_and_save(&mut driver, &mut ctx, limit, &runtime.settings.output_dir, None)
                .await?;
            let outcome = retrieve_records(runtime, &pipeline, &mut driver, &mut ctx, &batch.data)
                .await
                .with_context(|| format!("Discovered records are saved in {}", path.display()))?;
            Ok::<_, anyhow::Error>((batch, path, outcome))
        }
        .await
    })?;

    drop(ctx);
    let _ = renderer.await;

    println!(
        "{} Discovered {} records, saved to {}",
        style("✓").green(),
        batch.data.len(),
        style(path.display()).cyan()
    );
    finish(runtime, &pipeline, outcome).await
}

async fn finish(
    runtime: &Runtime,
    pipeline: &Pipeline,
    outcome: Option<PipelineOutcome>,
) -> anyhow::Result<()> {
    match outcome {
        Some(outcome) => report(runtime, &outcome).await,
        None => {
            println!("{} Run interrupted", style("!").yellow());
            if let Some(recorder) = pipeline.recorder() {
                print_artifacts(&recorder.artifacts());
            }
            anyhow::bail!("Interrupted")
        }
    }
}

async fn report(runtime: &Runtime, outcome: &PipelineOutcome) -> anyhow::Result<()> {
    let saved = match outcome.artifacts {
        Some(ref saved) => saved.clone(),
        None => {
            artifacts::save_run(
                &runtime.settings.output_dir,
                &outcome.log,
                outcome.rag_documents(),
                outcome.failed.clone(),
            )
            .await?
        }
    };

    let summary = &outcome.log.summary;
    let mark = if summary.failed == 0 {
        style("✓").green()
    } else {
        style("!").yellow()
    };
    println!(
        "{} {} of {} records published ({} failed, {} success)",
        mark, summary.successful, summary.total, summary.failed, summary.success_rate
    );
    print_artifacts(&saved);
    Ok(())
}

fn print_artifacts(saved: &RunArtifacts) {
    println!("  Run log: {}", style(saved.log.display()).cyan());
    println!("  RAG documents: {}", style(saved.rag.display()).cyan());
    if let Some(ref failed) = saved.failed {
        println!(
            "  Failed records: {} (rerun with `audiocrawl retrieve {}`)",
            style(failed.display()).cyan(),
            failed.display()
        );
    }
}
