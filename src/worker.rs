use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, NotificationsConfig};
use crate::diff::render_diff;
use crate::fetchers::{FetchRequest, FetchResult, FetcherRegistry};
use crate::models::{NotificationPayload, Tag, Watch, WatchUpdate};
use crate::notification::{filter_failure_payload, resolve_target, NotificationSender};
use crate::processors::{ProcessContext, ProcessorOutcome, ProcessorSet};
use crate::queue::WorkQueue;
use crate::store::WatchStore;
use crate::utils::error::{AppError, CheckError, Result};

/// What one processing attempt ended in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The watch no longer exists.
    Skipped,
    Unchanged,
    Changed { notified: bool },
    /// A per-attempt failure, labelled with its error kind.
    Failed(&'static str),
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub idle_poll: Duration,
    pub post_item_pause: Duration,
    pub request_timeout: Duration,
    pub notifications: NotificationsConfig,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            idle_poll: Duration::from_millis(config.workers.idle_poll_ms),
            post_item_pause: Duration::from_millis(config.workers.post_item_pause_ms),
            request_timeout: Duration::from_secs(config.fetcher.request_timeout),
            notifications: config.notifications.clone(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Everything the workers of one pool share.
pub struct WorkerContext {
    pub store: Arc<dyn WatchStore>,
    pub fetchers: FetcherRegistry,
    pub processors: ProcessorSet,
    pub queue: WorkQueue,
    pub notifications: NotificationSender,
    pub settings: WorkerSettings,
}

/// Start `count` workers against the same queue.
pub fn spawn_workers(
    context: Arc<WorkerContext>,
    count: usize,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let worker = UpdateWorker::new(id, context.clone(), cancel.clone());
            tokio::spawn(worker.run())
        })
        .collect()
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Next free history key; two checks inside the same second still get
/// strictly increasing timestamps.
fn next_history_timestamp(watch: &Watch, now: i64) -> i64 {
    match watch.history.last_key_value() {
        Some((&newest, _)) if newest >= now => newest + 1,
        _ => now,
    }
}

#[derive(Clone)]
pub struct UpdateWorker {
    id: usize,
    context: Arc<WorkerContext>,
    cancel: CancellationToken,
}

impl UpdateWorker {
    pub fn new(id: usize, context: Arc<WorkerContext>, cancel: CancellationToken) -> Self {
        Self { id, context, cancel }
    }

    /// Poll the queue until cancelled. An in-flight check always runs to
    /// completion before the token is looked at again.
    pub async fn run(self) {
        info!("Update worker {} started", self.id);
        while !self.cancel.is_cancelled() {
            let uuid = match self.context.queue.try_pop().await {
                Some(uuid) => uuid,
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.context.settings.idle_poll) => {}
                    }
                    continue;
                }
            };

            let outcome = self.process_isolated(&uuid).await;
            debug!("Worker {} finished {}: {:?}", self.id, uuid, outcome);
            self.context.queue.task_done(&uuid).await;
            tokio::time::sleep(self.context.settings.post_item_pause).await;
        }
        info!("Update worker {} stopped", self.id);
    }

    /// Runs `process` on its own task so a panicking check only fails that
    /// item and the worker keeps polling.
    pub async fn process_isolated(&self, uuid: &str) -> CheckOutcome {
        let worker = self.clone();
        let owned = uuid.to_string();
        let task = tokio::spawn(async move { worker.process(&owned).await });

        match task.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                error!("Worker {} crashed processing watch {}: {}", self.id, uuid, reason);
                let update = WatchUpdate {
                    last_checked: Some(Utc::now().timestamp()),
                    ..WatchUpdate::error(format!("Exception: {}", reason))
                };
                if let Err(e) = self.context.store.update(uuid, update).await {
                    error!("Could not record error on watch {}: {}", uuid, e);
                }
                metrics::counter!("changewatch_checks_total", "outcome" => "panic").increment(1);
                CheckOutcome::Failed("panic")
            }
        }
    }

    /// One full fetch, decide, persist and notify cycle for a watch.
    pub async fn process(&self, uuid: &str) -> CheckOutcome {
        let store = &self.context.store;
        let watch = match store.get(uuid).await {
            Ok(Some(watch)) => watch,
            Ok(None) => {
                debug!("Watch {} no longer exists, skipping", uuid);
                return CheckOutcome::Skipped;
            }
            Err(e) => {
                error!("Could not load watch {}: {}", uuid, e);
                return CheckOutcome::Failed("store");
            }
        };

        let started = Instant::now();
        let outcome = match self.check(&watch).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Exception processing watch {}: {}", uuid, e);
                if let Err(e) = store.update(uuid, WatchUpdate::error(e.to_string())).await {
                    error!("Could not record error on watch {}: {}", uuid, e);
                }
                CheckOutcome::Failed("internal")
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        metrics::histogram!("changewatch_check_duration_seconds").record(elapsed);
        let label = match &outcome {
            CheckOutcome::Skipped => "skipped",
            CheckOutcome::Unchanged => "unchanged",
            CheckOutcome::Changed { .. } => "changed",
            CheckOutcome::Failed(kind) => *kind,
        };
        metrics::counter!("changewatch_checks_total", "outcome" => label).increment(1);

        let stamp = WatchUpdate {
            fetch_time: Some(elapsed),
            last_checked: Some(Utc::now().timestamp()),
            ..Default::default()
        };
        if let Err(e) = store.update(uuid, stamp).await {
            warn!("Could not record check time on watch {}: {}", uuid, e);
        }
        outcome
    }

    async fn check(&self, watch: &Watch) -> Result<CheckOutcome> {
        let request = FetchRequest::from_watch(watch, self.context.settings.request_timeout);
        debug!("Fetching {} for watch {}", watch.url, watch.uuid);

        let fetched = match self.fetch(watch, &request).await {
            Ok(fetched) => fetched,
            Err(e) => return self.record_failure(watch, e).await,
        };

        let outcome = match self.load_tags(watch).await {
            Ok(tags) => {
                let decided = match self.context.processors.get(watch.processor) {
                    Ok(processor) => {
                        let ctx = ProcessContext {
                            watch,
                            fetched: &fetched,
                            tags: &tags,
                        };
                        processor.run(&ctx).await
                    }
                    Err(e) => Err(e),
                };
                match decided {
                    Ok(decided) => self.record_success(watch, decided).await,
                    Err(e) => self.record_failure(watch, e).await,
                }
            }
            Err(e) => Err(e),
        };

        // Artifacts are kept whatever the outcome
        let saved = self.save_artifacts(watch, &fetched).await;
        let outcome = outcome?;
        saved?;
        Ok(outcome)
    }

    async fn fetch(
        &self,
        watch: &Watch,
        request: &FetchRequest,
    ) -> std::result::Result<FetchResult, CheckError> {
        let fetcher = self.context.fetchers.get(watch.fetch_backend)?;
        fetcher.run(request).await
    }

    /// Tags in the order the watch lists them; unknown ids are ignored.
    async fn load_tags(&self, watch: &Watch) -> Result<Vec<Tag>> {
        let mut tags = Vec::with_capacity(watch.tags.len());
        for tag_uuid in &watch.tags {
            if let Some(tag) = self.context.store.get_tag(tag_uuid).await? {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    async fn record_failure(&self, watch: &Watch, err: CheckError) -> Result<CheckOutcome> {
        info!("Watch {} check failed ({}): {}", watch.uuid, err.kind(), err);
        let mut update = WatchUpdate::error(err.to_string()).with_status(err.status_code());

        let mut alert_after = None;
        if let CheckError::FilterNotFoundInResponse { .. } = &err {
            // Forces a change once the filter matches again
            update.previous_checksum = Some(String::new());

            if watch.filter_failure_notification_send {
                let attempts = watch.consecutive_filter_failures + 1;
                let threshold = self.context.settings.notifications.filter_failure_threshold_attempts;
                if threshold > 0 && attempts >= threshold {
                    alert_after = Some(attempts);
                    update.consecutive_filter_failures = Some(0);
                } else {
                    update.consecutive_filter_failures = Some(attempts);
                }
            }
        }

        self.context.store.update(&watch.uuid, update).await?;
        if let Some(attempts) = alert_after {
            self.send_filter_failure(watch, attempts)?;
        }
        Ok(CheckOutcome::Failed(err.kind()))
    }

    async fn record_success(&self, watch: &Watch, outcome: ProcessorOutcome) -> Result<CheckOutcome> {
        let store = &self.context.store;

        // The checksum is only merged once its snapshot is stored
        if outcome.changed || watch.last_checked.is_none() {
            let timestamp = next_history_timestamp(watch, Utc::now().timestamp());
            let reference = store.append_history(&watch.uuid, timestamp, &outcome.snapshot).await?;
            debug!("Watch {} snapshot saved as {}", watch.uuid, reference);
        }

        let mut update = outcome.update;
        update.consecutive_filter_failures = Some(0);
        store.update(&watch.uuid, update).await?;

        if !outcome.changed {
            return Ok(CheckOutcome::Unchanged);
        }
        metrics::counter!("changewatch_changes_detected_total").increment(1);

        let current = store.get(&watch.uuid).await?.ok_or_else(|| AppError::NotFound {
            resource: format!("watch {}", watch.uuid),
        })?;
        if current.history_n() < 2 {
            debug!("Watch {} has a single snapshot, not notifying", watch.uuid);
            return Ok(CheckOutcome::Changed { notified: false });
        }

        let notified = self.queue_change_notification(&current).await?;
        store
            .update(
                &watch.uuid,
                WatchUpdate {
                    last_changed: Some(Utc::now().timestamp()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(CheckOutcome::Changed { notified })
    }

    async fn queue_change_notification(&self, watch: &Watch) -> Result<bool> {
        let (previous_ref, current_ref) =
            watch
                .latest_two_snapshots()
                .ok_or_else(|| AppError::HistoryConsistency {
                    uuid: watch.uuid.clone(),
                    message: "fewer than two snapshots".to_string(),
                })?;
        if previous_ref == current_ref {
            return Err(AppError::HistoryConsistency {
                uuid: watch.uuid.clone(),
                message: "history has only one distinct snapshot".to_string(),
            });
        }

        let store = &self.context.store;
        let previous = store.read_snapshot(&watch.uuid, previous_ref).await?;
        let current = store.read_snapshot(&watch.uuid, current_ref).await?;
        let previous = String::from_utf8_lossy(&previous);
        let current = String::from_utf8_lossy(&current);

        let target = resolve_target(watch, &self.context.settings.notifications);
        let separator = target.format.line_separator();
        let mut payload = NotificationPayload::new(target, &watch.url, &watch.uuid);
        payload.diff = Some(render_diff(&previous, &current, false, separator));
        payload.diff_full = Some(render_diff(&previous, &current, true, separator));
        payload.current_snapshot = Some(current.into_owned());

        self.enqueue(payload)
    }

    fn send_filter_failure(&self, watch: &Watch, attempts: u32) -> Result<()> {
        warn!(
            "Filter '{}' for watch {} not found after {} attempts, sending alert",
            watch.filter_description(),
            watch.uuid,
            attempts
        );
        let payload = filter_failure_payload(watch, attempts, &self.context.settings.notifications);
        self.enqueue(payload).map(|_| ())
    }

    /// Returns false when the payload has nowhere to go.
    fn enqueue(&self, payload: NotificationPayload) -> Result<bool> {
        if payload.notification_urls.is_empty() {
            debug!("Watch {} has no notification URLs, nothing queued", payload.uuid);
            return Ok(false);
        }
        self.context
            .notifications
            .send(payload)
            .map_err(|_| AppError::Delivery("Notification queue is closed".to_string()))?;
        metrics::counter!("changewatch_notifications_queued_total").increment(1);
        Ok(true)
    }

    async fn save_artifacts(&self, watch: &Watch, fetched: &FetchResult) -> Result<()> {
        if let Some(screenshot) = &fetched.screenshot {
            self.context.store.save_screenshot(&watch.uuid, screenshot).await?;
        }
        if let Some(elements) = &fetched.xpath_data {
            self.context
                .store
                .save_structured_elements(&watch.uuid, elements)
                .await?;
        }
        Ok(())
    }
}
