use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{Tag, Watch, WatchUpdate};
use crate::utils::error::{AppError, Result};

/// Key-value watch persistence as seen by the update worker.
///
/// `update` must be atomic for a single watch record; nothing here spans
/// more than one watch.
#[async_trait]
pub trait WatchStore: Send + Sync {
    async fn get(&self, uuid: &str) -> Result<Option<Watch>>;
    async fn update(&self, uuid: &str, update: WatchUpdate) -> Result<()>;

    /// Persist a snapshot under `timestamp` and return its reference.
    /// Reusing a timestamp is a consistency violation.
    async fn append_history(&self, uuid: &str, timestamp: i64, snapshot: &[u8]) -> Result<String>;
    async fn read_snapshot(&self, uuid: &str, reference: &str) -> Result<Vec<u8>>;

    async fn save_screenshot(&self, uuid: &str, screenshot: &[u8]) -> Result<()>;
    async fn save_structured_elements(&self, uuid: &str, data: &serde_json::Value) -> Result<()>;

    async fn get_tag(&self, tag_uuid: &str) -> Result<Option<Tag>>;
    async fn watch_ids(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
struct WatchRecord {
    watch: Watch,
    snapshots: HashMap<String, Vec<u8>>,
    screenshot: Option<Vec<u8>>,
    structured_elements: Option<serde_json::Value>,
}

/// In-process store used by the binary and the tests.
#[derive(Clone, Default)]
pub struct MemoryWatchStore {
    records: Arc<RwLock<HashMap<String, WatchRecord>>>,
    tags: Arc<RwLock<HashMap<String, Tag>>>,
}

impl MemoryWatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_watch(&self, watch: Watch) {
        let mut records = self.records.write().await;
        records.insert(
            watch.uuid.clone(),
            WatchRecord {
                watch,
                ..Default::default()
            },
        );
    }

    pub async fn insert_tag(&self, tag: Tag) {
        let mut tags = self.tags.write().await;
        tags.insert(tag.uuid.clone(), tag);
    }

    pub async fn remove_watch(&self, uuid: &str) -> Option<Watch> {
        let mut records = self.records.write().await;
        records.remove(uuid).map(|r| r.watch)
    }

    pub async fn screenshot(&self, uuid: &str) -> Option<Vec<u8>> {
        let records = self.records.read().await;
        records.get(uuid).and_then(|r| r.screenshot.clone())
    }

    pub async fn structured_elements(&self, uuid: &str) -> Option<serde_json::Value> {
        let records = self.records.read().await;
        records.get(uuid).and_then(|r| r.structured_elements.clone())
    }

    fn missing(uuid: &str) -> AppError {
        AppError::NotFound {
            resource: format!("watch {}", uuid),
        }
    }
}

#[async_trait]
impl WatchStore for MemoryWatchStore {
    async fn get(&self, uuid: &str) -> Result<Option<Watch>> {
        let records = self.records.read().await;
        Ok(records.get(uuid).map(|r| r.watch.clone()))
    }

    async fn update(&self, uuid: &str, update: WatchUpdate) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(uuid).ok_or_else(|| Self::missing(uuid))?;
        record.watch.apply(update);
        Ok(())
    }

    async fn append_history(&self, uuid: &str, timestamp: i64, snapshot: &[u8]) -> Result<String> {
        let mut records = self.records.write().await;
        let record = records.get_mut(uuid).ok_or_else(|| Self::missing(uuid))?;

        if record.watch.history.contains_key(&timestamp) {
            return Err(AppError::HistoryConsistency {
                uuid: uuid.to_string(),
                message: format!("snapshot timestamp {} already exists", timestamp),
            });
        }
        if let Some((&newest, _)) = record.watch.history.last_key_value() {
            if newest > timestamp {
                return Err(AppError::HistoryConsistency {
                    uuid: uuid.to_string(),
                    message: format!("snapshot timestamp {} is older than {}", timestamp, newest),
                });
            }
        }

        let reference = format!("{}/{}.txt", uuid, timestamp);
        record.snapshots.insert(reference.clone(), snapshot.to_vec());
        record.watch.history.insert(timestamp, reference.clone());
        Ok(reference)
    }

    async fn read_snapshot(&self, uuid: &str, reference: &str) -> Result<Vec<u8>> {
        let records = self.records.read().await;
        let record = records.get(uuid).ok_or_else(|| Self::missing(uuid))?;
        record
            .snapshots
            .get(reference)
            .cloned()
            .ok_or_else(|| AppError::NotFound {
                resource: format!("snapshot {}", reference),
            })
    }

    async fn save_screenshot(&self, uuid: &str, screenshot: &[u8]) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(uuid).ok_or_else(|| Self::missing(uuid))?;
        record.screenshot = Some(screenshot.to_vec());
        Ok(())
    }

    async fn save_structured_elements(&self, uuid: &str, data: &serde_json::Value) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(uuid).ok_or_else(|| Self::missing(uuid))?;
        record.structured_elements = Some(data.clone());
        Ok(())
    }

    async fn get_tag(&self, tag_uuid: &str) -> Result<Option<Tag>> {
        let tags = self.tags.read().await;
        Ok(tags.get(tag_uuid).cloned())
    }

    async fn watch_ids(&self) -> Result<Vec<String>> {
        let records = self.records.read().await;
        let mut ids: Vec<String> = records.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
