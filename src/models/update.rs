use serde::{Deserialize, Serialize};

use crate::models::Restock;

/// Partial field set merged into a watch (read-merge-write).
///
/// `None` leaves the field untouched. `last_error: Some(None)` clears the
/// error and an empty `previous_checksum` clears the stored checksum.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WatchUpdate {
    pub last_error: Option<Option<String>>,
    pub last_check_status: Option<u16>,
    pub previous_checksum: Option<String>,
    pub content_type: Option<String>,
    pub consecutive_filter_failures: Option<u32>,
    pub restock: Option<Restock>,
    pub last_checked: Option<i64>,
    pub last_changed: Option<i64>,
    pub fetch_time: Option<f64>,
}

impl WatchUpdate {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            last_error: Some(Some(message.into())),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status_code: Option<u16>) -> Self {
        self.last_check_status = status_code;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
