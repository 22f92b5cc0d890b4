use serde::{Deserialize, Serialize};

use crate::models::NotificationFormat;

/// Everything the delivery sink needs to fan a change out to its targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    pub notification_urls: Vec<String>,
    pub notification_title: String,
    pub notification_body: String,
    pub notification_format: NotificationFormat,
    pub watch_url: String,
    pub uuid: String,
    pub current_snapshot: Option<String>,
    pub diff: Option<String>,
    pub diff_full: Option<String>,
}

/// Title/body/format/targets resolved for one notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationTarget {
    pub urls: Vec<String>,
    pub title: String,
    pub body: String,
    pub format: NotificationFormat,
}

impl NotificationPayload {
    pub fn new(target: NotificationTarget, watch_url: &str, uuid: &str) -> Self {
        Self {
            notification_urls: target.urls,
            notification_title: target.title,
            notification_body: target.body,
            notification_format: target.format,
            watch_url: watch_url.to_string(),
            uuid: uuid.to_string(),
            current_snapshot: None,
            diff: None,
            diff_full: None,
        }
    }
}
