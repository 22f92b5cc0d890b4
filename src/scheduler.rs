use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::queue::WorkQueue;
use crate::store::WatchStore;
use crate::utils::error::Result;

/// Queue every known watch. Watches still queued or in flight are left
/// alone. Returns how many ids were newly queued.
pub async fn enqueue_all(store: &dyn WatchStore, queue: &WorkQueue) -> Result<usize> {
    let mut queued = 0;
    for uuid in store.watch_ids().await? {
        if queue.push(&uuid).await {
            queued += 1;
        }
    }
    Ok(queued)
}

/// Periodic recheck of all watches on a cron schedule.
pub struct RecheckScheduler {
    scheduler: JobScheduler,
    store: Arc<dyn WatchStore>,
    queue: WorkQueue,
    config: SchedulerConfig,
    job_id: Option<Uuid>,
}

impl RecheckScheduler {
    pub async fn new(store: Arc<dyn WatchStore>, queue: WorkQueue, config: SchedulerConfig) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            store,
            queue,
            config,
            job_id: None,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        let store = Arc::clone(&self.store);
        let queue = self.queue.clone();

        let job = Job::new_async(self.config.recheck_cron.as_str(), move |_uuid, _l| {
            let store = Arc::clone(&store);
            let queue = queue.clone();

            Box::pin(async move {
                match enqueue_all(store.as_ref(), &queue).await {
                    Ok(queued) => tracing::debug!("Recheck queued {} watches", queued),
                    Err(e) => tracing::error!("Recheck could not list watches: {}", e),
                }
            })
        })?;

        self.job_id = Some(self.scheduler.add(job).await?);
        self.scheduler.start().await?;
        tracing::info!("Recheck scheduler started with cron '{}'", self.config.recheck_cron);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(job_id) = self.job_id.take() {
            self.scheduler.remove(&job_id).await?;
        }
        self.scheduler.shutdown().await?;
        tracing::info!("Recheck scheduler shutdown");
        Ok(())
    }

    pub fn is_scheduled(&self) -> bool {
        self.job_id.is_some()
    }
}
