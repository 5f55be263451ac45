//! Challenge-page detection and the human-in-the-loop wait.
//!
//! Runs after every navigation. When a challenge is showing, the gate polls
//! until someone clears it in the browser window or the wait budget runs
//! out. Nothing here tries to solve a challenge.

use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::driver::PageDriver;
use crate::config::CaptchaConfig;
use crate::context::{RunContext, RunEvent};
use crate::error::HarvestError;

/// Gate state for the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Clear,
    Challenged,
    Abandoned,
}

/// What gave the challenge away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeSignal {
    /// A visible element matched a challenge selector
    Element(String),
    Title(String),
    Url(String),
    /// Visible body text contained a verification phrase
    BodyText(String),
}

impl fmt::Display for ChallengeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element(selector) => write!(f, "visible element {}", selector),
            Self::Title(phrase) => write!(f, "title contains {:?}", phrase),
            Self::Url(phrase) => write!(f, "URL contains {:?}", phrase),
            Self::BodyText(phrase) => write!(f, "page text contains {:?}", phrase),
        }
    }
}

pub struct CaptchaGate {
    config: CaptchaConfig,
}

impl CaptchaGate {
    pub fn new(config: CaptchaConfig) -> Self {
        Self { config }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_secs.max(1))
    }

    fn max_wait(&self) -> Duration {
        Duration::from_secs(self.config.max_wait_secs)
    }

    fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.config.progress_interval_secs.max(1))
    }

    /// Run detection once against the current page.
    pub async fn detect<D: PageDriver>(&self, driver: &D) -> Option<ChallengeSignal> {
        for selector in &self.config.selectors {
            let elements = match driver.find_all(selector).await {
                Ok(elements) => elements,
                Err(e) => {
                    debug!("Challenge selector {} failed: {}", selector, e);
                    continue;
                }
            };
            for element in &elements {
                // Dormant widgets are often present but hidden
                if driver.is_visible(element).await.unwrap_or(false) {
                    return Some(ChallengeSignal::Element(selector.clone()));
                }
            }
        }

        let title = driver.title().await.unwrap_or_default().to_lowercase();
        if let Some(phrase) = find_phrase(&title, &self.config.title_phrases) {
            return Some(ChallengeSignal::Title(phrase));
        }

        if let Ok(url) = driver.current_url().await {
            let url = url.as_str().to_lowercase();
            if let Some(phrase) = find_phrase(&url, &self.config.url_phrases) {
                return Some(ChallengeSignal::Url(phrase));
            }
        }

        let body = driver.body_text().await.unwrap_or_default().to_lowercase();
        find_phrase(&body, &self.config.body_phrases).map(ChallengeSignal::BodyText)
    }

    /// Single detection pass mapped onto the gate states.
    pub async fn evaluate<D: PageDriver>(&self, driver: &D) -> GateState {
        match self.detect(driver).await {
            Some(_) => GateState::Challenged,
            None => GateState::Clear,
        }
    }

    /// Block until the current page is clear.
    ///
    /// Returns `ChallengeTimeout` when the challenge outlasts the wait budget
    /// or no human is available (non-interactive run, or a driver without a
    /// window); the caller abandons that page only.
    pub async fn guard<D: PageDriver>(
        &self,
        driver: &D,
        ctx: &mut RunContext,
    ) -> Result<(), HarvestError> {
        let Some(signal) = self.detect(driver).await else {
            return Ok(());
        };

        let url = driver
            .current_url()
            .await
            .map(|u| u.to_string())
            .unwrap_or_default();
        ctx.counters.challenges += 1;
        ctx.emit(RunEvent::ChallengeDetected { url: url.clone() })
            .await;

        // Static and headless drivers have nothing a person could solve
        if !ctx.interactive || !driver.has_window() {
            warn!("Challenge on {} ({}), no operator available", url, signal);
            return self.abandon(ctx, url, Duration::ZERO).await;
        }

        warn!(
            "Challenge on {} ({}). Solve it in the browser window; waiting up to {}s",
            url,
            signal,
            self.max_wait().as_secs()
        );

        let started = Instant::now();
        let mut last_progress = started;
        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.max_wait() {
                return self.abandon(ctx, url, elapsed).await;
            }

            sleep(self.poll_interval().min(self.max_wait() - elapsed)).await;

            if self.evaluate(driver).await == GateState::Clear {
                let waited = started.elapsed();
                info!("Challenge cleared after {}s", waited.as_secs());
                ctx.emit(RunEvent::ChallengeCleared {
                    url: url.clone(),
                    waited,
                })
                .await;
                sleep(Duration::from_millis(self.config.settle_ms)).await;
                return Ok(());
            }

            if last_progress.elapsed() >= self.progress_interval() {
                last_progress = Instant::now();
                let elapsed = started.elapsed();
                info!("Still waiting on challenge ({}s elapsed)", elapsed.as_secs());
                ctx.emit(RunEvent::ChallengeWaiting {
                    url: url.clone(),
                    elapsed,
                    remaining: self.max_wait().saturating_sub(elapsed),
                })
                .await;
            }
        }
    }

    async fn abandon(
        &self,
        ctx: &RunContext,
        url: String,
        waited: Duration,
    ) -> Result<(), HarvestError> {
        ctx.emit(RunEvent::ChallengeAbandoned {
            url: url.clone(),
            waited,
        })
        .await;
        Err(HarvestError::ChallengeTimeout { url, waited })
    }
}

fn find_phrase(haystack: &str, phrases: &[String]) -> Option<String> {
    phrases
        .iter()
        .find(|phrase| !phrase.is_empty() && haystack.contains(&phrase.to_lowercase()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_phrase_is_case_insensitive_on_phrase() {
        let phrases = vec!["Just a Moment".to_string()];
        assert_eq!(
            find_phrase("just a moment...", &phrases),
            Some("Just a Moment".to_string())
        );
        assert_eq!(find_phrase("daily lesson", &phrases), None);
    }

    #[test]
    fn test_empty_phrase_never_matches() {
        assert_eq!(find_phrase("anything", &[String::new()]), None);
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(
            ChallengeSignal::Element(".g-recaptcha".into()).to_string(),
            "visible element .g-recaptcha"
        );
        assert!(ChallengeSignal::BodyText("press and hold".into())
            .to_string()
            .contains("press and hold"));
    }
}
