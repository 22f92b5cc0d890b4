use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use url::Url;

use crate::models::NotificationFormat;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub workers: WorkerConfig,
    pub fetcher: FetcherConfig,
    pub browser: BrowserConfig,
    pub notifications: NotificationsConfig,
    pub scheduler: SchedulerConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub idle_poll_ms: u64,
    pub post_item_pause_ms: u64,
    pub extraction_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub request_timeout: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrowserProtocol {
    WebDriver,
    DevTools,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
    pub protocol: BrowserProtocol,
    pub endpoint: String,
    pub delay_before_content_ready: u64,
    pub screenshot: bool,
    pub step_capture_dir: Option<String>,
    /// Outbound proxy descriptor handed to the browser at session start,
    /// keyed by WebDriver proxy capability name (proxyType, httpProxy, ...).
    pub proxy: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub urls: Vec<String>,
    pub title: String,
    pub body: String,
    pub format: NotificationFormat,
    pub filter_failure_threshold_attempts: u32,
    pub delivery_retries: usize,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub recheck_cron: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: Option<String>,
    pub file_prefix: String,
}

/// Proxy capability keys accepted from `webdriver_<key>` environment variables.
pub const WEBDRIVER_PROXY_KEYS: [&str; 11] = [
    "proxyType",
    "ftpProxy",
    "httpProxy",
    "noProxy",
    "proxyAutoconfigUrl",
    "sslProxy",
    "autodetect",
    "socksProxy",
    "socksVersion",
    "socksUsername",
    "socksPassword",
];

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            idle_poll_ms: 1000,
            post_item_pause_ms: 100,
            extraction_timeout_secs: 30,
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: 45,
            user_agent: "UatuChangewatch/0.1".to_string(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            protocol: BrowserProtocol::WebDriver,
            endpoint: "http://browser-chrome:4444/wd/hub".to_string(),
            delay_before_content_ready: 5,
            screenshot: true,
            step_capture_dir: None,
            proxy: None,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            title: "Uatu Changewatch Notification - {{watch_url}}".to_string(),
            body: "{{watch_url}} had a change.\n---\n{{diff}}\n---\n".to_string(),
            format: NotificationFormat::Text,
            filter_failure_threshold_attempts: 6,
            delivery_retries: 3,
            base_url: "http://localhost:5000".to_string(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recheck_cron: "0 */5 * * * *".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9001,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "changewatch.log".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load("config/default")
    }

    pub fn load(base: &str) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(base).required(false))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "CHANGEWATCH_"
            .add_source(Environment::with_prefix("CHANGEWATCH").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;
        config.apply_legacy_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Honour the WEBDRIVER_* variables older deployments set.
    pub fn apply_legacy_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("WEBDRIVER_URL") {
            // Accidentally quoted values are common in compose files
            self.browser.endpoint = endpoint.trim_matches('"').to_string();
            self.browser.enabled = true;
        }

        if let Some(delay) = lookup("WEBDRIVER_DELAY_BEFORE_CONTENT_READY")
            .and_then(|v| v.trim_matches('"').parse::<u64>().ok())
        {
            self.browser.delay_before_content_ready = delay;
        }

        let proxy: BTreeMap<String, String> = WEBDRIVER_PROXY_KEYS
            .iter()
            .filter_map(|key| {
                lookup(&format!("webdriver_{}", key))
                    .filter(|v| !v.is_empty())
                    .map(|v| (key.to_string(), v.trim_matches('"').to_string()))
            })
            .collect();

        if !proxy.is_empty() {
            self.browser.proxy = Some(proxy);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.count == 0 {
            return Err(ConfigError::Message("Worker count must be greater than 0".into()));
        }

        if self.workers.idle_poll_ms == 0 {
            return Err(ConfigError::Message("Worker idle_poll_ms must be greater than 0".into()));
        }

        if self.workers.extraction_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Worker extraction_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.fetcher.request_timeout == 0 {
            return Err(ConfigError::Message("Fetcher request_timeout must be greater than 0".into()));
        }

        if self.browser.enabled && Url::parse(&self.browser.endpoint).is_err() {
            return Err(ConfigError::Message("Invalid browser endpoint URL format".into()));
        }

        if let Some(proxy) = &self.browser.proxy {
            if let Some(unknown) = proxy.keys().find(|k| !WEBDRIVER_PROXY_KEYS.contains(&k.as_str())) {
                return Err(ConfigError::Message(format!("Unknown browser proxy setting '{}'", unknown)));
            }
        }

        for url in &self.notifications.urls {
            if Url::parse(url).is_err() {
                return Err(ConfigError::Message(format!("Invalid notification URL '{}'", url)));
            }
        }

        if self.scheduler.enabled && !Self::is_valid_cron(&self.scheduler.recheck_cron) {
            return Err(ConfigError::Message(
                "Invalid cron expression in scheduler.recheck_cron".into(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }

    /// Basic cron validation: six fields (second minute hour day month weekday).
    pub fn is_valid_cron(cron_expr: &str) -> bool {
        let parts: Vec<&str> = cron_expr.split_whitespace().collect();
        if parts.len() != 6 {
            return false;
        }

        parts.iter().all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_digit() || c == '*' || c == '-' || c == ',' || c == '/')
        })
    }
}
