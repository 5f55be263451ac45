//! Renders run events as progress bars and status lines.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::RunEvent;

/// Consume events until every sender is dropped.
pub fn spawn_renderer(mut rx: mpsc::Receiver<RunEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(120));

        let mut records: Option<ProgressBar> = None;
        let mut discovered = 0usize;
        let mut pages = 0usize;

        while let Some(event) = rx.recv().await {
            let bar = records.as_ref().unwrap_or(&spinner);
            match event {
                RunEvent::PageVisited { url, .. } => {
                    pages += 1;
                    spinner.set_message(format!("{} pages, {} records | {}", pages, discovered, url));
                }
                RunEvent::PageFailed { url, error } => {
                    bar.println(format!("  {} {}: {}", style("✗").red(), url, error));
                }
                RunEvent::ChallengeDetected { url } => {
                    bar.println(format!(
                        "  {} Challenge on {}, solve it in the browser window",
                        style("!").yellow(),
                        url
                    ));
                }
                RunEvent::ChallengeWaiting { elapsed, remaining, .. } => {
                    bar.println(format!(
                        "  {} Waiting on challenge: {}s elapsed, {}s left",
                        style("…").yellow(),
                        elapsed.as_secs(),
                        remaining.as_secs()
                    ));
                }
                RunEvent::ChallengeCleared { waited, .. } => {
                    bar.println(format!(
                        "  {} Challenge cleared after {}s",
                        style("✓").green(),
                        waited.as_secs()
                    ));
                }
                RunEvent::ChallengeAbandoned { url, .. } => {
                    bar.println(format!(
                        "  {} Gave up on challenge at {}",
                        style("✗").red(),
                        url
                    ));
                }
                RunEvent::RecordDiscovered { title, .. } => {
                    discovered += 1;
                    spinner.set_message(format!("{} pages, {} records | {}", pages, discovered, title));
                }
                RunEvent::RecordStarted { index, total, title } => {
                    let progress = records.get_or_insert_with(|| {
                        spinner.finish_and_clear();
                        let progress = ProgressBar::new(total as u64);
                        if let Ok(style) = ProgressStyle::default_bar()
                            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                        {
                            progress.set_style(style.progress_chars("#>-"));
                        }
                        progress
                    });
                    progress.set_message(format!("#{} {}", index, title));
                }
                RunEvent::RetryScheduled { index, attempt, error } => {
                    bar.println(format!(
                        "  {} #{} attempt {} failed: {}",
                        style("↻").yellow(),
                        index,
                        attempt,
                        error
                    ));
                }
                RunEvent::RecordCompleted { summary, .. } => {
                    bar.inc(1);
                    bar.set_message(format!("{} ok, {} failed", summary.successful, summary.failed));
                }
                RunEvent::RecordFailed { error, summary, .. } => {
                    bar.inc(1);
                    bar.println(format!("  {} {}", style("✗").red(), error));
                    bar.set_message(format!("{} ok, {} failed", summary.successful, summary.failed));
                }
            }
        }

        spinner.finish_and_clear();
        if let Some(progress) = records {
            progress.finish_and_clear();
        }
    })
}
