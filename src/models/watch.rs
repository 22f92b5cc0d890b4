use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::models::{
    FetchBackend, NotificationFormat, ProcessorKind, Restock, RestockSettings, WatchUpdate,
    generate_id,
};

/// One scripted interaction replayed in the browser before capture.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserStep {
    pub operation: String,
    pub selector: String,
    pub optional_value: String,
}

impl BrowserStep {
    pub fn new(operation: &str, selector: &str, optional_value: &str) -> Self {
        Self {
            operation: operation.to_string(),
            selector: selector.to_string(),
            optional_value: optional_value.to_string(),
        }
    }
}

/// A monitored URL plus its configuration and last-known state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Watch {
    pub uuid: String,
    pub url: String,
    pub title: Option<String>,

    // Fetching
    pub fetch_backend: FetchBackend,
    pub processor: ProcessorKind,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub ignore_status_codes: bool,
    pub browser_steps: Vec<BrowserStep>,
    /// Overrides the browser settle delay, in seconds.
    pub webdriver_delay: Option<u64>,

    // Filtering
    #[serde(alias = "css_filter")]
    pub include_filters: Vec<String>,
    pub extract_text: Vec<String>,
    pub tags: Vec<String>,

    // Notification rules
    pub notification_urls: Vec<String>,
    pub notification_title: Option<String>,
    pub notification_body: Option<String>,
    pub notification_format: NotificationFormat,
    pub filter_failure_notification_send: bool,

    // Processing state, owned by the update worker
    /// Unix timestamp -> snapshot reference. Keys only ever grow.
    pub history: BTreeMap<i64, String>,
    #[serde(alias = "previous_md5")]
    pub previous_checksum: Option<String>,
    pub last_checked: Option<i64>,
    pub last_changed: Option<i64>,
    pub last_error: Option<String>,
    pub last_check_status: Option<u16>,
    pub consecutive_filter_failures: u32,
    pub content_type: Option<String>,
    pub fetch_time: Option<f64>,
    pub restock: Option<Restock>,
    pub restock_settings: RestockSettings,
}

impl Default for Watch {
    fn default() -> Self {
        Self {
            uuid: generate_id(),
            url: String::new(),
            title: None,
            fetch_backend: FetchBackend::default(),
            processor: ProcessorKind::default(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            ignore_status_codes: false,
            browser_steps: Vec::new(),
            webdriver_delay: None,
            include_filters: Vec::new(),
            extract_text: Vec::new(),
            tags: Vec::new(),
            notification_urls: Vec::new(),
            notification_title: None,
            notification_body: None,
            notification_format: NotificationFormat::default(),
            filter_failure_notification_send: true,
            history: BTreeMap::new(),
            previous_checksum: None,
            last_checked: None,
            last_changed: None,
            last_error: None,
            last_check_status: None,
            consecutive_filter_failures: 0,
            content_type: None,
            fetch_time: None,
            restock: None,
            restock_settings: RestockSettings::default(),
        }
    }
}

impl Watch {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn history_n(&self) -> usize {
        self.history.len()
    }

    /// The two most recent snapshot references, oldest first.
    pub fn latest_two_snapshots(&self) -> Option<(&String, &String)> {
        let mut newest = self.history.values().rev();
        let current = newest.next()?;
        let previous = newest.next()?;
        Some((previous, current))
    }

    pub fn filter_description(&self) -> String {
        self.include_filters.join(", ")
    }

    /// Merge a partial field set into the watch.
    pub fn apply(&mut self, update: WatchUpdate) {
        if let Some(last_error) = update.last_error {
            self.last_error = last_error;
        }
        if let Some(status) = update.last_check_status {
            self.last_check_status = Some(status);
        }
        if let Some(checksum) = update.previous_checksum {
            self.previous_checksum = if checksum.is_empty() {
                None
            } else {
                Some(checksum)
            };
        }
        if let Some(content_type) = update.content_type {
            self.content_type = Some(content_type);
        }
        if let Some(failures) = update.consecutive_filter_failures {
            self.consecutive_filter_failures = failures;
        }
        if let Some(restock) = update.restock {
            self.restock = Some(restock);
        }
        if let Some(last_checked) = update.last_checked {
            self.last_checked = Some(last_checked);
        }
        if let Some(last_changed) = update.last_changed {
            self.last_changed = Some(last_changed);
        }
        if let Some(fetch_time) = update.fetch_time {
            self.fetch_time = Some(fetch_time);
        }
    }
}
