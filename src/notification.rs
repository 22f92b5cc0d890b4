use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NotificationsConfig;
use crate::models::{NotificationFormat, NotificationPayload, NotificationTarget, Watch};
use crate::utils::error::AppError;

pub type NotificationSender = UnboundedSender<NotificationPayload>;
pub type NotificationReceiver = UnboundedReceiver<NotificationPayload>;

pub const FILTER_FAILURE_TITLE: &str = "Alert - CSS/xPath filter was not present in the page";

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("valid token pattern"));

/// A watch with its own URLs supplies the whole target; otherwise every
/// field comes from the global settings. Blank watch templates fall back
/// to the global ones.
pub fn resolve_target(watch: &Watch, defaults: &NotificationsConfig) -> NotificationTarget {
    if watch.notification_urls.is_empty() {
        return NotificationTarget {
            urls: defaults.urls.clone(),
            title: defaults.title.clone(),
            body: defaults.body.clone(),
            format: defaults.format,
        };
    }

    let own = |value: &Option<String>, fallback: &str| {
        value
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string())
    };
    NotificationTarget {
        urls: watch.notification_urls.clone(),
        title: own(&watch.notification_title, &defaults.title),
        body: own(&watch.notification_body, &defaults.body),
        format: watch.notification_format,
    }
}

/// Notification sent when a watch's filter kept matching nothing.
pub fn filter_failure_payload(
    watch: &Watch,
    attempts: u32,
    defaults: &NotificationsConfig,
) -> NotificationPayload {
    let mut target = resolve_target(watch, defaults);
    target.title = FILTER_FAILURE_TITLE.to_string();
    target.body = format!(
        "Your configured CSS/xPath filters of '{}' for {{{{watch_url}}}} did not appear on the page after {} attempts, did the page change layout?\n\nLink: {}/edit/{}\n",
        watch.filter_description(),
        attempts,
        defaults.base_url.trim_end_matches('/'),
        watch.uuid
    );
    target.format = NotificationFormat::Text;
    NotificationPayload::new(target, &watch.url, &watch.uuid)
}

/// Replace `{{token}}` placeholders with payload fields. Unknown tokens stay.
pub fn render_template(template: &str, payload: &NotificationPayload) -> String {
    TOKEN
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let value = match &caps[1] {
                "watch_url" => Some(payload.watch_url.as_str()),
                "watch_uuid" => Some(payload.uuid.as_str()),
                "diff" => Some(payload.diff.as_deref().unwrap_or_default()),
                "diff_full" => Some(payload.diff_full.as_deref().unwrap_or_default()),
                "current_snapshot" => Some(payload.current_snapshot.as_deref().unwrap_or_default()),
                _ => None,
            };
            value.map(str::to_string).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryResult {
    pub url: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Fans a payload out to each of its target URLs.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, payload: &NotificationPayload) -> Vec<DeliveryResult>;
}

/// JSON POST to every http(s) target. `json://` and `jsons://` are
/// accepted as aliases.
pub struct WebhookSink {
    client: Client,
    retries: usize,
    backoff_factor_ms: u64,
}

impl WebhookSink {
    pub fn new(retries: usize) -> Result<Self, AppError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            retries,
            backoff_factor_ms: 250,
        })
    }

    pub fn with_backoff_factor(mut self, factor_ms: u64) -> Self {
        self.backoff_factor_ms = factor_ms;
        self
    }

    fn endpoint(url: &str) -> Option<String> {
        if let Some(rest) = url.strip_prefix("jsons://") {
            return Some(format!("https://{}", rest));
        }
        if let Some(rest) = url.strip_prefix("json://") {
            return Some(format!("http://{}", rest));
        }
        (url.starts_with("http://") || url.starts_with("https://")).then(|| url.to_string())
    }

    fn body(payload: &NotificationPayload) -> serde_json::Value {
        let format = match payload.notification_format {
            NotificationFormat::Text => "text",
            NotificationFormat::Markdown => "markdown",
            NotificationFormat::Html => "html",
        };
        json!({
            "title": render_template(&payload.notification_title, payload),
            "message": render_template(&payload.notification_body, payload),
            "type": "info",
            "format": format,
            "watch_url": payload.watch_url,
            "watch_uuid": payload.uuid,
        })
    }

    async fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<(), String> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.backoff_factor_ms)
            .map(jitter)
            .take(self.retries);

        let client = &self.client;
        Retry::spawn(strategy, move || async move {
            let response = client
                .post(endpoint)
                .json(body)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            if response.status().is_success() {
                Ok(())
            } else {
                debug!("Webhook {} answered {}", endpoint, response.status());
                Err(format!("HTTP {}", response.status()))
            }
        })
        .await
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, payload: &NotificationPayload) -> Vec<DeliveryResult> {
        let body = Self::body(payload);
        let mut results = Vec::with_capacity(payload.notification_urls.len());

        for url in &payload.notification_urls {
            let url = url.trim();
            let outcome = match Self::endpoint(url) {
                Some(endpoint) => self.post(&endpoint, &body).await,
                None => Err("Unsupported notification URL scheme".to_string()),
            };
            if let Err(e) = &outcome {
                warn!("Notification to {} failed: {}", url, e);
            }
            results.push(DeliveryResult {
                url: url.to_string(),
                success: outcome.is_ok(),
                error: outcome.err(),
            });
        }
        results
    }
}

/// Drain the notification queue until cancelled or every sender is gone.
pub async fn run_delivery(
    mut receiver: NotificationReceiver,
    sink: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
) {
    info!("Notification delivery started");
    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(payload) => payload,
                None => break,
            },
        };

        if payload.notification_urls.is_empty() {
            debug!("No notification targets for watch {}", payload.uuid);
            continue;
        }

        let results = sink.deliver(&payload).await;
        let failed = results.iter().filter(|r| !r.success).count();
        metrics::counter!("changewatch_notifications_delivered_total").increment((results.len() - failed) as u64);
        if failed > 0 {
            metrics::counter!("changewatch_notifications_failed_total").increment(failed as u64);
            error!(
                "{} of {} notification targets failed for watch {}",
                failed,
                results.len(),
                payload.uuid
            );
        }
    }
    info!("Notification delivery stopped");
}
