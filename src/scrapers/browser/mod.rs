//! Chromium page driver for sites that need a real browser.
//!
//! Uses chromiumoxide (CDP) with stealth evasion so challenge pages are
//! rarer, and a visible window when a human has to solve one.

mod config;
#[cfg(feature = "browser")]
mod stealth;

pub use config::{default_headless, default_timeout, BrowserEngineConfig, BrowserEngineType};

#[cfg(feature = "browser")]
pub use driver::BrowserPageDriver;

#[cfg(feature = "browser")]
mod driver {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use chromiumoxide::cdp::browser_protocol::browser::{
        SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
    };
    use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
    use chromiumoxide::{Browser, BrowserConfig, Element, Page};
    use futures::StreamExt;
    use tokio::task::JoinHandle;
    use tracing::{debug, info, warn};

    use super::config::{BrowserEngineConfig, BrowserEngineType};
    use super::stealth::{STEALTH_ARGS, STEALTH_SCRIPTS, WAIT_FOR_READY_SCRIPT};
    use crate::models::ResourceRef;
    use crate::scrapers::driver::PageDriver;
    use crate::scrapers::http_client::resolve_user_agent;

    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &[&str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        // Common install locations
        "/opt/google/chrome/google-chrome",
    ];

    /// One Chromium tab driven over CDP.
    pub struct BrowserPageDriver {
        config: BrowserEngineConfig,
        browser: Browser,
        page: Page,
        handler: JoinHandle<()>,
    }

    impl BrowserPageDriver {
        /// Launch (or connect to) Chrome and open a blank tab.
        ///
        /// Downloads triggered in the tab land in `download_dir`.
        pub async fn launch(config: BrowserEngineConfig, download_dir: &Path) -> Result<Self> {
            let (browser, mut handler) = match config.remote_url.clone() {
                Some(remote_url) => connect_remote(&config, &remote_url).await?,
                None => {
                    info!("Launching browser (headless={})", config.headless);
                    let chrome_path = match config.chrome_path.clone() {
                        Some(path) => path,
                        None => find_chrome()?,
                    };

                    let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
                    // with_head means NOT headless
                    if !config.headless {
                        builder = builder.with_head();
                    }
                    if let Some(ref proxy) = config.proxy {
                        builder = builder.arg(format!("--proxy-server={}", proxy));
                    }
                    for arg in STEALTH_ARGS {
                        builder = builder.arg(*arg);
                    }
                    for arg in &config.chrome_args {
                        builder = builder.arg(arg);
                    }
                    let browser_config = builder
                        .build()
                        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

                    Browser::launch(browser_config)
                        .await
                        .context("Failed to launch browser")?
                }
            };

            let handler = tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            let page = browser
                .new_page("about:blank")
                .await
                .context("Failed to open browser tab")?;

            let user_agent = resolve_user_agent(Some(
                config.user_agent.as_deref().unwrap_or("impersonate"),
            ));
            page.execute(SetUserAgentOverrideParams::new(user_agent))
                .await
                .context("Failed to set user agent")?;

            tokio::fs::create_dir_all(download_dir).await?;
            let download_path = std::fs::canonicalize(download_dir)
                .unwrap_or_else(|_| PathBuf::from(download_dir));
            let params = SetDownloadBehaviorParams::builder()
                .behavior(SetDownloadBehaviorBehavior::Allow)
                .download_path(download_path.to_string_lossy().to_string())
                .build()
                .map_err(|e| anyhow::anyhow!("Invalid download behavior: {}", e))?;
            browser
                .execute(params)
                .await
                .context("Failed to route downloads")?;

            Ok(Self {
                config,
                browser,
                page,
                handler,
            })
        }

        /// Close the tab and the browser connection.
        pub async fn close(mut self) {
            let _ = self.page.clone().close().await;
            let _ = self.browser.close().await;
            self.handler.abort();
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(self.config.timeout)
        }

        /// Wait for ready state, apply stealth, wait for the configured selector.
        async fn settle(&self) {
            match tokio::time::timeout(
                self.timeout(),
                self.page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
            )
            .await
            {
                Ok(Ok(result)) => {
                    let state: String = result
                        .into_value()
                        .unwrap_or_else(|_| "unknown".to_string());
                    debug!("Page ready state: {}", state);
                }
                Ok(Err(e)) => debug!("Could not check ready state: {}", e),
                Err(_) => warn!("Timeout waiting for page ready state"),
            }

            if self.config.engine == BrowserEngineType::Stealth {
                for script in STEALTH_SCRIPTS {
                    if let Err(e) = self.page.evaluate(script.to_string()).await {
                        debug!("Stealth script injection skipped: {}", e);
                    }
                }
            }

            // Late-loading scripts
            tokio::time::sleep(Duration::from_millis(500)).await;

            if let Some(ref selector) = self.config.wait_for_selector {
                match tokio::time::timeout(self.timeout(), self.page.find_element(selector.as_str()))
                    .await
                {
                    Ok(Ok(_)) => debug!("Selector {} found", selector),
                    Ok(Err(e)) => warn!("Selector {} not found: {}", selector, e),
                    Err(_) => warn!("Timeout waiting for selector {}", selector),
                }
            }
        }
    }

    /// Find Chrome executable.
    fn find_chrome() -> Result<PathBuf> {
        for path in CHROME_PATHS {
            let p = Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Install it, set browser.chrome_path, \
             or point BROWSER_URL at a running instance"
        ))
    }

    /// Connect to a remote Chrome instance.
    async fn connect_remote(
        config: &BrowserEngineConfig,
        url: &str,
    ) -> Result<(Browser, chromiumoxide::handler::Handler)> {
        info!(
            "Connecting to remote browser at {} (timeout: {}s)",
            url, config.timeout
        );

        // Get WebSocket URL from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(config.timeout),
            ..Default::default()
        };

        Browser::connect_with_config(ws_url, handler_config)
            .await
            .context("Failed to connect to remote browser")
    }

    #[async_trait]
    impl PageDriver for BrowserPageDriver {
        type Element = Element;

        async fn navigate(&mut self, target: &ResourceRef) -> Result<()> {
            info!("Navigating to {}", target);
            tokio::time::timeout(self.timeout(), self.page.goto(target.as_str()))
                .await
                .map_err(|_| anyhow::anyhow!("Timed out loading {}", target))?
                .with_context(|| format!("Failed to load {}", target))?;
            self.settle().await;
            Ok(())
        }

        async fn find_all(&self, selector: &str) -> Result<Vec<Element>> {
            Ok(self.page.find_elements(selector).await.unwrap_or_default())
        }

        async fn text_of(&self, element: &Element) -> Result<Option<String>> {
            Ok(element
                .inner_text()
                .await?
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()))
        }

        async fn attribute_of(&self, element: &Element, name: &str) -> Result<Option<String>> {
            Ok(element.attribute(name).await?)
        }

        async fn is_visible(&self, element: &Element) -> Result<bool> {
            // Elements without a layout box fail to report one
            Ok(match element.bounding_box().await {
                Ok(b) => b.width > 0.0 && b.height > 0.0,
                Err(_) => false,
            })
        }

        async fn activate(&mut self, element: &Element) -> Result<()> {
            element.click().await.context("Click failed")?;
            if tokio::time::timeout(self.timeout(), self.page.wait_for_navigation())
                .await
                .is_err()
            {
                debug!("No navigation after click");
            }
            self.settle().await;
            Ok(())
        }

        async fn fill(&mut self, element: &Element, value: &str) -> Result<()> {
            element.click().await?;
            element.type_str(value).await?;
            Ok(())
        }

        async fn current_url(&self) -> Result<ResourceRef> {
            let url = self
                .page
                .url()
                .await?
                .ok_or_else(|| anyhow::anyhow!("Tab has no URL"))?;
            Ok(ResourceRef::parse(&url)?)
        }

        async fn title(&self) -> Result<String> {
            Ok(self.page.get_title().await?.unwrap_or_default())
        }

        async fn body_text(&self) -> Result<String> {
            let value = self
                .page
                .evaluate("document.body ? document.body.innerText : ''")
                .await?;
            Ok(value.into_value::<String>().unwrap_or_default())
        }

        fn has_window(&self) -> bool {
            !self.config.headless
        }
    }
}
