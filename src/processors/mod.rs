use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::fetchers::FetchResult;
use crate::models::{ProcessorKind, Tag, Watch, WatchUpdate};
use crate::utils::error::CheckError;

pub mod filter;
pub mod restock_diff;
pub mod text_diff;

pub use filter::{HtmlTextFilter, TextFilter};
pub use restock_diff::RestockProcessor;
pub use text_diff::TextDiffProcessor;

/// Hex SHA-256 of a snapshot.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Everything a processor may look at for one attempt.
pub struct ProcessContext<'a> {
    pub watch: &'a Watch,
    pub fetched: &'a FetchResult,
    /// The watch's tags in the watch's own order.
    pub tags: &'a [Tag],
}

/// What a processor decided about one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorOutcome {
    pub changed: bool,
    pub update: WatchUpdate,
    pub snapshot: Vec<u8>,
}

/// Reduces a fetch result to a change decision.
#[async_trait]
pub trait ChangeProcessor: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    async fn run(&self, ctx: &ProcessContext<'_>) -> Result<ProcessorOutcome, CheckError>;
}

/// Processors keyed by the kind a watch selects.
#[derive(Clone, Default)]
pub struct ProcessorSet {
    processors: HashMap<ProcessorKind, Arc<dyn ChangeProcessor>>,
}

impl ProcessorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text diff with the HTML filter plus the restock processor.
    pub fn standard(extraction_timeout: Duration) -> Self {
        Self::new()
            .with(Arc::new(TextDiffProcessor::new(Arc::new(HtmlTextFilter::new()))))
            .with(Arc::new(RestockProcessor::new(extraction_timeout)))
    }

    pub fn with(mut self, processor: Arc<dyn ChangeProcessor>) -> Self {
        self.processors.insert(processor.kind(), processor);
        self
    }

    pub fn get(&self, kind: ProcessorKind) -> Result<Arc<dyn ChangeProcessor>, CheckError> {
        self.processors
            .get(&kind)
            .cloned()
            .ok_or_else(|| CheckError::Unexpected(format!("No processor registered for {:?}", kind)))
    }
}
