use anyhow::{anyhow, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, Tab};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{BrowserDriver, BrowserSession, Locator};
use crate::config::BrowserProtocol;
use crate::utils::error::AppError;

/// Connects to a remote Chrome over the DevTools protocol.
///
/// `headless_chrome` is blocking, so every call runs on the blocking pool.
pub struct DevToolsDriver {
    endpoint: String,
    client: Client,
}

impl DevToolsDriver {
    pub fn new(endpoint: &str) -> Result<Self, AppError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Resolve the websocket debugger URL, asking `/json/version` for plain
    /// http endpoints.
    async fn websocket_url(&self) -> Result<String> {
        if self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://") {
            return Ok(self.endpoint.clone());
        }
        let version: Value = self
            .client
            .get(format!("{}/json/version", self.endpoint))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        version
            .get("webSocketDebuggerUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("No webSocketDebuggerUrl at {}", self.endpoint))
    }
}

#[async_trait]
impl BrowserDriver for DevToolsDriver {
    fn protocol(&self) -> BrowserProtocol {
        BrowserProtocol::DevTools
    }

    async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        let ws_url = self.websocket_url().await?;
        debug!("Connecting to DevTools at {}", ws_url);

        let session = tokio::task::spawn_blocking(move || -> Result<DevToolsSession> {
            let browser = Browser::connect(ws_url)
                .map_err(|e| anyhow!("Failed to connect to browser: {}", e))?;
            let tab = browser
                .new_tab()
                .map_err(|e| anyhow!("Failed to create tab: {}", e))?;
            Ok(DevToolsSession {
                browser: Arc::new(browser),
                tab,
            })
        })
        .await
        .map_err(|e| anyhow!("Browser task failed: {}", e))??;

        Ok(Box::new(session))
    }

    async fn probe(&self) -> bool {
        self.websocket_url().await.is_ok()
    }
}

struct DevToolsSession {
    browser: Arc<Browser>,
    tab: Arc<Tab>,
}

impl DevToolsSession {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Browser>, Arc<Tab>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let browser = Arc::clone(&self.browser);
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(browser, tab))
            .await
            .map_err(|e| anyhow!("Browser task failed: {}", e))?
    }
}

/// A custom User-Agent header wins; otherwise drop the headless marker.
pub fn effective_user_agent(headers: &HashMap<String, String>, browser_ua: &str) -> Option<String> {
    if let Some((_, ua)) = headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("user-agent")) {
        return Some(ua.clone());
    }
    if browser_ua.is_empty() {
        return None;
    }
    Some(browser_ua.replace("HeadlessChrome", "Chrome"))
}

#[async_trait]
impl BrowserSession for DevToolsSession {
    async fn apply_headers(&self, headers: &HashMap<String, String>) -> Result<()> {
        let headers = headers.clone();
        self.blocking(move |browser, tab| {
            let browser_ua = browser
                .get_version()
                .map(|v| v.user_agent)
                .unwrap_or_default();
            if let Some(ua) = effective_user_agent(&headers, &browser_ua) {
                tab.set_user_agent(&ua, None, None)
                    .map_err(|e| anyhow!("Failed to set user agent: {}", e))?;
            }

            let extra: HashMap<&str, &str> = headers
                .iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case("user-agent"))
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            if !extra.is_empty() {
                tab.set_extra_http_headers(extra)
                    .map_err(|e| anyhow!("Failed to set headers: {}", e))?;
            }
            Ok(())
        })
        .await
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.blocking(move |_, tab| {
            tab.navigate_to(&url)
                .map_err(|e| anyhow!("Navigation failed: {}", e))?;
            tab.wait_until_navigated()
                .map_err(|e| anyhow!("Navigation timeout: {}", e))?;
            Ok(())
        })
        .await
    }

    async fn page_source(&self) -> Result<String> {
        self.blocking(|_, tab| {
            tab.get_content()
                .map_err(|e| anyhow!("Failed to get page content: {}", e))
        })
        .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.blocking(|_, tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(|e| anyhow!("Screenshot capture failed: {}", e))
        })
        .await
    }

    async fn execute_script(&self, script: &str) -> Result<Value> {
        // Scripts are function bodies; serialise the result so objects survive.
        let expression = format!("JSON.stringify((function() {{\n{}\n}})())", script);
        self.blocking(move |_, tab| {
            let result = tab
                .evaluate(&expression, false)
                .map_err(|e| anyhow!("Script evaluation failed: {}", e))?;
            match result.value {
                Some(Value::String(json)) => serde_json::from_str(&json)
                    .map_err(|e| anyhow!("Failed to parse script result: {}", e)),
                _ => Ok(Value::Null),
            }
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let locator = Locator::parse(selector);
        self.blocking(move |_, tab| {
            let element = match &locator {
                Locator::Css(css) => tab.find_element(css),
                Locator::XPath(xpath) => tab.find_element_by_xpath(xpath),
            }
            .map_err(|e| anyhow!("Element {:?} not found: {}", locator, e))?;
            element
                .click()
                .map_err(|e| anyhow!("Click failed: {}", e))?;
            Ok(())
        })
        .await
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let locator = Locator::parse(selector);
        let text = text.to_string();
        self.blocking(move |_, tab| {
            let element = match &locator {
                Locator::Css(css) => tab.find_element(css),
                Locator::XPath(xpath) => tab.find_element_by_xpath(xpath),
            }
            .map_err(|e| anyhow!("Element {:?} not found: {}", locator, e))?;
            element
                .type_into(&text)
                .map_err(|e| anyhow!("Typing failed: {}", e))?;
            Ok(())
        })
        .await
    }

    async fn press_enter(&self) -> Result<()> {
        self.blocking(|_, tab| {
            tab.press_key("Enter")
                .map_err(|e| anyhow!("Key press failed: {}", e))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.blocking(|_, tab| {
            tab.close(true)
                .map_err(|e| anyhow!("Failed to close tab: {}", e))?;
            Ok(())
        })
        .await
    }
}
