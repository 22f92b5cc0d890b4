use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{checksum, ChangeProcessor, ProcessContext, ProcessorOutcome, TextFilter};
use crate::fetchers::FetchedContent;
use crate::models::{ProcessorKind, WatchUpdate};
use crate::utils::error::CheckError;

/// Generic content change detection: filter, extract, checksum.
pub struct TextDiffProcessor {
    filter: Arc<dyn TextFilter>,
}

impl TextDiffProcessor {
    pub fn new(filter: Arc<dyn TextFilter>) -> Self {
        Self { filter }
    }
}

#[async_trait]
impl ChangeProcessor for TextDiffProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::TextDiff
    }

    async fn run(&self, ctx: &ProcessContext<'_>) -> Result<ProcessorOutcome, CheckError> {
        let content_type = ctx.fetched.content_type();

        let snapshot = match &ctx.fetched.content {
            FetchedContent::Binary(bytes) => bytes.clone(),
            FetchedContent::Text(text) => self
                .filter
                .apply(text, &content_type, ctx.watch)?
                .into_bytes(),
        };

        let fetched_checksum = checksum(&snapshot);
        let changed = ctx.watch.previous_checksum.as_deref() != Some(fetched_checksum.as_str());
        debug!(
            "Watch {} - previous checksum {:?}, fetched {}",
            ctx.watch.uuid, ctx.watch.previous_checksum, fetched_checksum
        );

        let update = WatchUpdate {
            last_error: Some(None),
            last_check_status: Some(ctx.fetched.status_code),
            content_type: Some(content_type),
            previous_checksum: Some(fetched_checksum),
            ..Default::default()
        };

        Ok(ProcessorOutcome {
            changed,
            update,
            snapshot,
        })
    }
}
