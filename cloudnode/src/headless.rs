use anyhow::{anyhow, Result};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Launch arguments for running Chromium inside containers and CI
const LAUNCH_ARGS: [&str; 5] = [
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-extensions",
    "--no-first-run",
];

const LAUNCH_ATTEMPTS: u32 = 3;

/// Await a browser close, logging a failure before handing it back
pub async fn logged_close<F>(closing: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let closed = closing.await;
    if let Err(e) = &closed {
        error!("Error during CloudNode shutdown\n{}", e);
    }
    closed
}

/// HeadlessBrowser owns one Chromium instance and its CDP event loop
pub struct HeadlessBrowser {
    /// The browser instance
    browser: Option<Browser>,
    /// Task draining the browser handler stream
    handler: Option<JoinHandle<()>>,
}

impl Default for HeadlessBrowser {
    fn default() -> Self {
        Self {
            browser: None,
            handler: None,
        }
    }
}

impl HeadlessBrowser {
    /// Create a new headless browser
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the browser has been started and not yet closed
    pub fn is_running(&self) -> bool {
        self.browser.is_some()
    }

    /// Start the browser
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        info!("Starting headless Chrome browser");

        let config = BrowserConfig::builder()
            .no_sandbox()
            .incognito()
            .args(LAUNCH_ARGS.to_vec())
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {}", e))?;

        let mut last_error = None;

        for attempt in 1..=LAUNCH_ATTEMPTS {
            match Browser::launch(config.clone()).await {
                Ok((browser, mut handler)) => {
                    let handle = tokio::spawn(async move {
                        while let Some(event) = handler.next().await {
                            if let Err(e) = event {
                                debug!("Browser handler error: {}", e);
                            }
                        }
                    });

                    self.browser = Some(browser);
                    self.handler = Some(handle);

                    info!("Headless Chrome browser started successfully");
                    return Ok(());
                }
                Err(e) => {
                    error!("Failed to launch browser (attempt {}): {}", attempt, e);
                    last_error = Some(e);

                    if attempt < LAUNCH_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        Err(anyhow!(
            "Failed to start Chrome browser after {} attempts: {:?}",
            LAUNCH_ATTEMPTS,
            last_error
        ))
    }

    /// Open a fresh tab to drive
    pub async fn new_session(&self) -> Result<BrowserSession> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| anyhow!("Browser not started"))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("Failed to create new page: {}", e))?;

        Ok(BrowserSession { page })
    }

    /// Close the browser and stop its event loop
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };

        info!("Stopping headless Chrome browser");

        let closed = browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("Failed to close browser: {}", e));

        if let Err(e) = browser.wait().await {
            warn!("Error waiting for browser process to exit: {}", e);
        }

        if let Some(handler) = self.handler.take() {
            handler.abort();
        }

        if closed.is_ok() {
            info!("Headless Chrome browser stopped");
        }
        closed
    }
}

impl Drop for HeadlessBrowser {
    fn drop(&mut self) {
        if self.browser.is_some() {
            warn!("HeadlessBrowser dropped without close(), the browser process is killed on drop");
        }
    }
}

/// A single tab driven by the scraper
pub struct BrowserSession {
    page: Page,
}

impl BrowserSession {
    /// Navigate and wait for the document to load
    pub async fn navigate(&self, url: &str, wait: Duration) -> Result<()> {
        debug!("Navigating to {}", url);

        match timeout(wait, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(anyhow!("Failed to navigate to {}: {}", url, e)),
            Err(_) => return Err(anyhow!("Timeout navigating to {}", url)),
        }

        if timeout(wait, self.page.wait_for_navigation()).await.is_err() {
            warn!("Timeout waiting for page navigation, will inspect content anyway");
        }

        Ok(())
    }

    /// Whether any element matches `selector`
    ///
    /// Returns `None` when the page answered with something other than a boolean.
    pub async fn element_exists(&self, selector: &str) -> Result<Option<bool>> {
        let script = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(selector)?
        );

        let result = timeout(Duration::from_secs(10), self.page.evaluate(script))
            .await
            .map_err(|_| anyhow!("Timeout checking for {}", selector))?
            .map_err(|e| anyhow!("Failed to evaluate selector {}: {}", selector, e))?;

        Ok(result.value().and_then(|v| v.as_bool()))
    }

    /// Rendered HTML of the current document
    pub async fn content(&self) -> Result<String> {
        match timeout(Duration::from_secs(10), self.page.content()).await {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(anyhow!("Failed to get page content: {}", e)),
            Err(_) => Err(anyhow!("Timeout getting page content")),
        }
    }

    /// Close the tab
    pub async fn close(self) -> Result<()> {
        self.page
            .close()
            .await
            .map_err(|e| anyhow!("Error closing page: {}", e))
    }
}
