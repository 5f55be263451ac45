//! Shared helpers for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{Config, Settings};
use crate::context::{RunContext, RunEvent};
use crate::error::HarvestError;
use crate::scrapers::captcha::CaptchaGate;
use crate::scrapers::driver::PageDriver;
use crate::scrapers::http_client::{HtmlPageDriver, HttpFetcher};
use crate::services::object_store;
use crate::services::{
    AnonymousAuthenticator, Authenticator, Credentials, FormAuthenticator, Pipeline,
    PlacementDeriver, Retriever, RunRecorder,
};

/// Loaded configuration plus CLI-level switches.
pub struct Runtime {
    pub config: Arc<Config>,
    pub settings: Settings,
    pub interactive: bool,
}

impl Runtime {
    pub fn new(config: Config, interactive: bool) -> Self {
        let settings = config.settings();
        Self {
            config: Arc::new(config),
            settings,
            interactive,
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.request_timeout)
    }

    /// Fresh run context reporting to `events`.
    pub fn context(&self, events: mpsc::Sender<RunEvent>) -> RunContext {
        let ctx = RunContext::new(self.config.clone(), self.settings.clone()).with_events(events);
        if self.interactive {
            ctx
        } else {
            ctx.non_interactive()
        }
    }

    pub fn http_driver(&self) -> anyhow::Result<HtmlPageDriver<HttpFetcher>> {
        let fetcher = HttpFetcher::new(self.request_timeout(), self.settings.user_agent.as_deref())?;
        Ok(HtmlPageDriver::new(fetcher).with_download_dir(&self.settings.downloads_dir))
    }

    #[cfg(feature = "browser")]
    pub async fn browser_driver(&self) -> anyhow::Result<crate::scrapers::BrowserPageDriver> {
        crate::scrapers::BrowserPageDriver::launch(
            self.config.browser.clone(),
            &self.settings.downloads_dir,
        )
        .await
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.config.auth.as_ref().and_then(Credentials::from_config)
    }

    pub fn authenticator<D: PageDriver>(&self) -> Result<Box<dyn Authenticator<D>>, HarvestError> {
        match self.config.auth {
            Some(ref auth) => Ok(Box::new(FormAuthenticator::new(
                auth.clone(),
                &self.config.site.base()?,
            )?)),
            None => Ok(Box::new(AnonymousAuthenticator)),
        }
    }

    /// Retrieval and publishing stages wired from config.
    pub fn pipeline(&self) -> Result<Pipeline, HarvestError> {
        let config = &self.config;
        config.validate_for_retrieval()?;

        let retriever = Retriever::new(
            config.retrieval.clone(),
            &self.settings.downloads_dir,
            config.site.selectors.download_trigger.clone(),
        )
        .with_gate(CaptchaGate::new(config.captcha.clone()));
        let deriver = PlacementDeriver::new(&config.storage, &config.retrieval.extension);
        let store = object_store::from_config(&config.storage, &self.settings, self.request_timeout())?;

        Ok(Pipeline::new(
            retriever,
            deriver,
            store,
            &config.retrieval.extension,
            Duration::from_millis(config.retrieval.record_delay_ms),
        )
        .with_recorder(RunRecorder::new(&self.settings.output_dir)))
    }
}

/// Run `$body` with `$driver` bound to the configured page driver.
///
/// `$body` must evaluate to a `Result`; the browser is closed before it is
/// returned.
macro_rules! with_driver {
    ($runtime:expr, $driver:ident => $body:expr) => {
        match $runtime.config.driver {
            $crate::config::DriverKind::Http => {
                let mut $driver = $runtime.http_driver()?;
                $body
            }
            #[cfg(feature = "browser")]
            $crate::config::DriverKind::Browser => {
                let mut $driver = $runtime.browser_driver().await?;
                let result = $body;
                $driver.close().await;
                result
            }
            #[cfg(not(feature = "browser"))]
            $crate::config::DriverKind::Browser => {
                anyhow::bail!("Built without browser support; use --driver http")
            }
        }
    };
}

pub(crate) use with_driver;
