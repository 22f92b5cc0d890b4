use anyhow::{anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Method, Response};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

use super::{BrowserDriver, BrowserSession, Locator};
use crate::config::BrowserProtocol;
use crate::utils::error::AppError;

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const ENTER_KEY: &str = "\u{E007}";

/// Talks the WebDriver wire protocol to a remote browser service.
pub struct WebDriverClient {
    client: Client,
    endpoint: String,
    proxy: Option<Value>,
}

impl WebDriverClient {
    pub fn new(endpoint: &str, proxy: Option<BTreeMap<String, String>>) -> Result<Self, AppError> {
        url::Url::parse(endpoint).map_err(|e| {
            AppError::Config(config::ConfigError::Message(format!(
                "Invalid WebDriver endpoint '{}': {}",
                endpoint, e
            )))
        })?;

        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            proxy: proxy.filter(|p| !p.is_empty()).map(|p| proxy_capability(&p)),
        })
    }

    fn capabilities(&self) -> Value {
        let mut always_match = json!({ "browserName": "chrome" });
        if let Some(proxy) = &self.proxy {
            always_match["proxy"] = proxy.clone();
        }
        json!({
            "capabilities": { "alwaysMatch": always_match.clone() },
            "desiredCapabilities": always_match,
        })
    }
}

/// Translate `webdriver_<key>` settings into a W3C proxy capability.
pub fn proxy_capability(settings: &BTreeMap<String, String>) -> Value {
    let mut proxy = serde_json::Map::new();
    for (key, raw) in settings {
        let raw = raw.trim().trim_matches('"');
        let value = match key.as_str() {
            "proxyType" => Value::String(raw.to_lowercase()),
            "socksVersion" => raw
                .parse::<u64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            "autodetect" => Value::Bool(matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes")),
            "noProxy" => Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(|h| Value::String(h.to_string()))
                    .collect(),
            ),
            _ => Value::String(raw.to_string()),
        };
        proxy.insert(key.clone(), value);
    }
    if !proxy.contains_key("proxyType") {
        proxy.insert("proxyType".to_string(), Value::String("manual".to_string()));
    }
    Value::Object(proxy)
}

async fn decode(response: Response) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
        bail!("{}: {}", error, message);
    }
    if !status.is_success() {
        bail!("WebDriver returned status {}", status);
    }
    Ok(value)
}

#[async_trait]
impl BrowserDriver for WebDriverClient {
    fn protocol(&self) -> BrowserProtocol {
        BrowserProtocol::WebDriver
    }

    async fn open_session(&self) -> anyhow::Result<Box<dyn BrowserSession>> {
        let response = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&self.capabilities())
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if let Some(error) = body.pointer("/value/error").and_then(Value::as_str) {
            let message = body
                .pointer("/value/message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            bail!("{}: {}", error, message);
        }

        let session_id = body
            .pointer("/value/sessionId")
            .or_else(|| body.get("sessionId"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("No session id in WebDriver reply (status {})", status))?;

        debug!("Opened WebDriver session {}", session_id);
        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
        }))
    }

    async fn probe(&self) -> bool {
        let response = match self.client.get(format!("{}/status", self.endpoint)).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("WebDriver status probe failed: {}", e);
                return false;
            }
        };
        match decode(response).await {
            Ok(value) => value.get("ready").and_then(Value::as_bool).unwrap_or(true),
            Err(_) => false,
        }
    }
}

struct WebDriverSession {
    client: Client,
    base: String,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> anyhow::Result<Value> {
        let mut request = self.client.request(method, format!("{}{}", self.base, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        decode(request.send().await?).await
    }

    async fn find_element(&self, selector: &str) -> anyhow::Result<String> {
        let (using, value) = match Locator::parse(selector) {
            Locator::Css(css) => ("css selector", css),
            Locator::XPath(xpath) => ("xpath", xpath),
        };
        let found = self
            .command(Method::POST, "/element", Some(json!({ "using": using, "value": value })))
            .await
            .map_err(|e| anyhow!("Element '{}' not found: {}", selector, e))?;

        found
            .get(ELEMENT_KEY)
            .or_else(|| found.get("ELEMENT"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Element '{}' not found", selector))
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn apply_headers(&self, headers: &HashMap<String, String>) -> anyhow::Result<()> {
        if !headers.is_empty() {
            debug!("WebDriver sessions cannot set request headers, {} ignored", headers.len());
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> anyhow::Result<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn page_source(&self) -> anyhow::Result<String> {
        let value = self.command(Method::GET, "/source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Page source was not a string"))
    }

    async fn screenshot(&self) -> anyhow::Result<Vec<u8>> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| anyhow!("Screenshot was not a base64 string"))?;
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }

    async fn execute_script(&self, script: &str) -> anyhow::Result<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": [] })),
        )
        .await
    }

    async fn click(&self, selector: &str) -> anyhow::Result<()> {
        let element = self.find_element(selector).await?;
        self.command(Method::POST, &format!("/element/{}/click", element), Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn type_text(&self, selector: &str, text: &str) -> anyhow::Result<()> {
        let element = self.find_element(selector).await?;
        self.command(
            Method::POST,
            &format!("/element/{}/value", element),
            Some(json!({ "text": text })),
        )
        .await
        .map(|_| ())
    }

    async fn press_enter(&self) -> anyhow::Result<()> {
        let actions = json!({
            "actions": [{
                "type": "key",
                "id": "keyboard",
                "actions": [
                    { "type": "keyDown", "value": ENTER_KEY },
                    { "type": "keyUp", "value": ENTER_KEY }
                ]
            }]
        });
        self.command(Method::POST, "/actions", Some(actions)).await.map(|_| ())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.command(Method::DELETE, "", None).await.map(|_| ())
    }
}
