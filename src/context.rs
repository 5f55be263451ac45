//! Explicit per-run state shared by every crawl component.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{Config, Settings};
use crate::models::RunSummary;
use crate::scrapers::ledger::VisitationLedger;
use crate::services::auth::SessionContext;

/// Progress signals emitted while a run is in flight.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A page was loaded during discovery
    PageVisited { url: String, depth: usize },
    /// A page or branch was abandoned
    PageFailed { url: String, error: String },
    /// A challenge page was detected
    ChallengeDetected { url: String },
    /// Still waiting on a human to clear a challenge
    ChallengeWaiting {
        url: String,
        elapsed: Duration,
        remaining: Duration,
    },
    /// Challenge cleared, traversal resumes
    ChallengeCleared { url: String, waited: Duration },
    /// Challenge was not cleared in time or nobody is available to clear it
    ChallengeAbandoned { url: String, waited: Duration },
    /// A leaf page produced a content record
    RecordDiscovered { title: String, page_url: String },
    /// Per-record processing started
    RecordStarted {
        index: usize,
        total: usize,
        title: String,
    },
    /// A retrieval attempt failed and will be retried
    RetryScheduled {
        index: usize,
        attempt: u32,
        error: String,
    },
    /// Record retrieved and stored
    RecordCompleted {
        index: usize,
        key: String,
        summary: RunSummary,
    },
    /// Record failed after all retries
    RecordFailed {
        index: usize,
        error: String,
        summary: RunSummary,
    },
}

/// Counters updated as the run progresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub pages_visited: usize,
    pub pages_failed: usize,
    pub challenges: usize,
    pub records_discovered: usize,
    pub records_succeeded: usize,
    pub records_failed: usize,
}

impl RunCounters {
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_counts(self.records_succeeded, self.records_failed)
    }
}

/// Configuration, ledger, session and counters for one run.
///
/// Passed by reference to every component instead of living in globals, so
/// independent runs (and tests) never share state.
pub struct RunContext {
    pub config: Arc<Config>,
    pub settings: Settings,
    pub ledger: VisitationLedger,
    pub counters: RunCounters,
    pub session: Option<SessionContext>,
    /// Whether a human is available to clear challenges or log in.
    pub interactive: bool,
    events: Option<mpsc::Sender<RunEvent>>,
}

impl RunContext {
    pub fn new(config: Arc<Config>, settings: Settings) -> Self {
        Self {
            config,
            settings,
            ledger: VisitationLedger::new(),
            counters: RunCounters::default(),
            session: None,
            interactive: true,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    /// Send an event to the listener, if any. A closed channel is ignored.
    pub async fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_listener_is_noop() {
        let ctx = RunContext::new(Arc::new(Config::default()), Settings::default());
        ctx.emit(RunEvent::ChallengeDetected {
            url: "https://example.org".into(),
        })
        .await;
        assert!(ctx.interactive);
    }

    #[tokio::test]
    async fn test_emit_delivers_to_listener() {
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = RunContext::new(Arc::new(Config::default()), Settings::default())
            .with_events(tx)
            .non_interactive();
        ctx.emit(RunEvent::PageVisited {
            url: "https://example.org/a".into(),
            depth: 2,
        })
        .await;
        match rx.recv().await {
            Some(RunEvent::PageVisited { depth, .. }) => assert_eq!(depth, 2),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!ctx.interactive);
    }

    #[test]
    fn test_counters_summary() {
        let counters = RunCounters {
            records_succeeded: 2,
            records_failed: 1,
            ..Default::default()
        };
        let summary = counters.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.success_rate, "66.67%");
    }
}
