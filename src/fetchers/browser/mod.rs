use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ContentFetcher, FetchRequest, FetchResult, FetchedContent};
use crate::config::{BrowserConfig, BrowserProtocol};
use crate::models::FetchBackend;
use crate::utils::error::{AppError, CheckError};

pub mod devtools;
pub mod steps;
pub mod webdriver;

pub use devtools::DevToolsDriver;
pub use steps::{StepCapture, StepInterpreter, StepRun};
pub use webdriver::WebDriverClient;

/// Collects geometry and xPath of visible block elements.
pub const XPATH_ELEMENT_JS: &str = include_str!("../js/xpath_element_scraper.js");
/// Returns the first visible out-of-stock phrase or "Possibly in stock".
pub const INSTOCK_DATA_JS: &str = include_str!("../js/stock_not_in_stock.js");

/// How a selector string addresses elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn parse(selector: &str) -> Self {
        let selector = selector.trim();
        if let Some(xpath) = selector.strip_prefix("xpath:") {
            Locator::XPath(xpath.trim().to_string())
        } else if selector.starts_with('/') || selector.starts_with("(/") {
            Locator::XPath(selector.to_string())
        } else {
            Locator::Css(selector.to_string())
        }
    }
}

/// One live browser session (tab/window).
///
/// Scripts are function bodies: use `return` to hand back a value.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn apply_headers(&self, headers: &HashMap<String, String>) -> anyhow::Result<()>;
    async fn navigate(&self, url: &str) -> anyhow::Result<()>;
    async fn page_source(&self) -> anyhow::Result<String>;
    async fn screenshot(&self) -> anyhow::Result<Vec<u8>>;
    async fn execute_script(&self, script: &str) -> anyhow::Result<serde_json::Value>;
    async fn click(&self, selector: &str) -> anyhow::Result<()>;
    async fn type_text(&self, selector: &str, text: &str) -> anyhow::Result<()>;
    async fn press_enter(&self) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}

/// Opens sessions against a remote browser service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    fn protocol(&self) -> BrowserProtocol;
    async fn open_session(&self) -> anyhow::Result<Box<dyn BrowserSession>>;
    async fn probe(&self) -> bool;
}

/// Fetches through a real browser: JS rendering, steps, screenshots.
pub struct BrowserFetcher {
    driver: Arc<dyn BrowserDriver>,
    config: BrowserConfig,
    interpreter: StepInterpreter,
}

impl BrowserFetcher {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: BrowserConfig) -> Self {
        Self {
            driver,
            config,
            interpreter: StepInterpreter::new(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: StepInterpreter) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Build the driver for the configured protocol.
    pub fn from_config(config: &BrowserConfig) -> Result<Self, AppError> {
        let driver: Arc<dyn BrowserDriver> = match config.protocol {
            BrowserProtocol::WebDriver => Arc::new(WebDriverClient::new(
                &config.endpoint,
                config.proxy.clone(),
            )?),
            BrowserProtocol::DevTools => {
                if config.proxy.is_some() {
                    warn!("Proxy settings are not applied to DevTools sessions");
                }
                Arc::new(DevToolsDriver::new(&config.endpoint)?)
            }
        };
        info!(
            "Browser fetcher using {:?} at {}",
            driver.protocol(),
            config.endpoint
        );
        Ok(Self::new(driver, config.clone()))
    }

    async fn fetch_in_session(
        &self,
        session: &dyn BrowserSession,
        request: &FetchRequest,
    ) -> Result<FetchResult, CheckError> {
        if let Err(e) = session.apply_headers(&request.headers).await {
            warn!("Could not apply request headers for {}: {}", request.url, e);
        }

        session
            .navigate(&request.url)
            .await
            .map_err(|e| CheckError::PageUnloadable {
                status_code: None,
                url: request.url.clone(),
                message: e.to_string(),
            })?;

        let settle = request
            .settle_delay
            .unwrap_or(Duration::from_secs(self.config.delay_before_content_ready));
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        if !request.browser_steps.is_empty() {
            let run = self.interpreter.run(session, &request.browser_steps).await;
            if let Some(dir) = &self.config.step_capture_dir {
                if let Err(e) = save_step_captures(Path::new(dir), &request.watch_uuid, &run.captures).await {
                    warn!("Could not save browser step captures: {}", e);
                }
            }
            run.into_result()?;
        }

        let content = session
            .page_source()
            .await
            .map_err(|e| CheckError::PageUnloadable {
                status_code: Some(200),
                url: request.url.clone(),
                message: e.to_string(),
            })?;
        if content.trim().is_empty() {
            return Err(CheckError::EmptyReply {
                status_code: 200,
                url: request.url.clone(),
            });
        }

        let screenshot = if self.config.screenshot {
            let shot = session.screenshot().await.map_err(|e| {
                debug!("Screenshot failed for {}: {}", request.url, e);
                CheckError::ScreenshotUnavailable {
                    status_code: 200,
                    url: request.url.clone(),
                }
            })?;
            Some(shot)
        } else {
            None
        };

        let xpath_data = match session.execute_script(XPATH_ELEMENT_JS).await {
            Ok(serde_json::Value::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Element map script failed on {}: {}", request.url, e);
                None
            }
        };

        let instock_data = match session.execute_script(INSTOCK_DATA_JS).await {
            Ok(serde_json::Value::String(text)) => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!("In-stock scan script failed on {}: {}", request.url, e);
                None
            }
        };

        let mut result = FetchResult::new(200, FetchedContent::Text(content));
        result.screenshot = screenshot;
        result.xpath_data = xpath_data;
        result.instock_data = instock_data;
        Ok(result)
    }
}

#[async_trait]
impl ContentFetcher for BrowserFetcher {
    fn backend(&self) -> FetchBackend {
        FetchBackend::Browser
    }

    async fn run(&self, request: &FetchRequest) -> Result<FetchResult, CheckError> {
        let session = self
            .driver
            .open_session()
            .await
            .map_err(|e| CheckError::PageUnloadable {
                status_code: None,
                url: request.url.clone(),
                message: format!("Could not start browser session: {}", e),
            })?;

        let result = tokio::time::timeout(
            request.timeout + Duration::from_secs(self.config.delay_before_content_ready),
            self.fetch_in_session(session.as_ref(), request),
        )
        .await
        .unwrap_or_else(|_| {
            Err(CheckError::PageUnloadable {
                status_code: None,
                url: request.url.clone(),
                message: "Timed out waiting for the browser".to_string(),
            })
        });

        if let Err(e) = session.close().await {
            warn!("Exception in browser shutdown/quit: {}", e);
        }

        result
    }

    async fn is_ready(&self) -> bool {
        self.driver.probe().await
    }
}

fn capture_dir(root: &Path, watch_uuid: &str) -> PathBuf {
    root.join(watch_uuid)
}

/// Replace the stored step captures of one watch.
pub async fn save_step_captures(
    root: &Path,
    watch_uuid: &str,
    captures: &[StepCapture],
) -> Result<(), AppError> {
    let dir = capture_dir(root, watch_uuid);
    tokio::fs::create_dir_all(&dir).await?;

    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let stale = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with("step_"));
        if stale && entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }

    for capture in captures {
        if let Some(png) = &capture.screenshot {
            tokio::fs::write(dir.join(format!("step_{}.png", capture.label)), png).await?;
        }
        if let Some(html) = &capture.html {
            tokio::fs::write(dir.join(format!("step_{}.html", capture.label)), html).await?;
        }
    }
    debug!("Saved {} step captures to {}", captures.len(), dir.display());
    Ok(())
}
