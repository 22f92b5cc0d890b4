use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{BrowserStep, FetchBackend, Watch};
use crate::utils::error::CheckError;

pub mod browser;
pub mod http;

pub use browser::{BrowserFetcher, StepInterpreter};
pub use http::HttpFetcher;

/// One fetch of one URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub watch_uuid: String,
    pub url: String,
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub method: String,
    pub ignore_status_codes: bool,
    pub browser_steps: Vec<BrowserStep>,
    /// Overrides the browser settle delay.
    pub settle_delay: Option<Duration>,
}

impl FetchRequest {
    pub fn from_watch(watch: &Watch, timeout: Duration) -> Self {
        Self {
            watch_uuid: watch.uuid.clone(),
            url: watch.url.clone(),
            timeout,
            headers: watch.headers.clone(),
            body: watch.body.clone(),
            method: watch.method.clone(),
            ignore_status_codes: watch.ignore_status_codes,
            browser_steps: watch.browser_steps.clone(),
            settle_delay: watch.webdriver_delay.map(Duration::from_secs),
        }
    }

    /// Case-insensitive request header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchedContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FetchedContent {
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            FetchedContent::Text(text) => Cow::Borrowed(text),
            FetchedContent::Binary(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FetchedContent::Text(text) => text.as_bytes(),
            FetchedContent::Binary(bytes) => bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Raw content plus metadata from one fetch. Never persisted as-is.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status_code: u16,
    pub content: FetchedContent,
    pub headers: HashMap<String, String>,
    pub screenshot: Option<Vec<u8>>,
    /// Element geometry/xPath map for visual selection.
    pub xpath_data: Option<serde_json::Value>,
    /// Free-text stock signal from the page scanner script.
    pub instock_data: Option<String>,
}

impl FetchResult {
    pub fn new(status_code: u16, content: FetchedContent) -> Self {
        Self {
            status_code,
            content,
            headers: HashMap::new(),
            screenshot: None,
            xpath_data: None,
            instock_data: None,
        }
    }

    /// All headers with lower-cased keys.
    pub fn get_all_headers(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect()
    }

    pub fn content_type(&self) -> String {
        self.get_all_headers()
            .remove("content-type")
            .unwrap_or_default()
    }
}

/// Retrieves raw content for one URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    fn backend(&self) -> FetchBackend;

    async fn run(&self, request: &FetchRequest) -> Result<FetchResult, CheckError>;

    /// Lightweight connectivity probe for health checks.
    async fn is_ready(&self) -> bool;
}

/// Fetchers keyed by the backend a watch selects.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<FetchBackend, Arc<dyn ContentFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, fetcher: Arc<dyn ContentFetcher>) {
        let backend = fetcher.backend();
        tracing::debug!("Registered fetcher for backend {}", backend.as_str());
        self.fetchers.insert(backend, fetcher);
    }

    pub fn with(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.register(fetcher);
        self
    }

    pub fn get(&self, backend: FetchBackend) -> Result<Arc<dyn ContentFetcher>, CheckError> {
        self.fetchers.get(&backend).cloned().ok_or_else(|| {
            CheckError::Unexpected(format!(
                "No fetcher available for backend '{}'",
                backend.as_str()
            ))
        })
    }

    pub fn backends(&self) -> Vec<FetchBackend> {
        let mut backends: Vec<FetchBackend> = self.fetchers.keys().copied().collect();
        backends.sort_by_key(|b| b.as_str());
        backends
    }

    /// Probe every registered fetcher.
    pub async fn readiness(&self) -> Vec<(FetchBackend, bool)> {
        let mut report = Vec::new();
        for backend in self.backends() {
            let ready = match self.fetchers.get(&backend) {
                Some(fetcher) => fetcher.is_ready().await,
                None => false,
            };
            report.push((backend, ready));
        }
        report
    }
}
