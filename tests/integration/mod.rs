// Shared fixtures for the pipeline integration tests: a wiremock site, the
// real HTTP fetcher and an in-memory store wired into one update worker.

pub mod pipeline_tests;
pub mod restock_tests;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use uatu_changewatch::{
    config::FetcherConfig,
    fetchers::HttpFetcher,
    models::NotificationPayload,
    FetcherRegistry, MemoryWatchStore, ProcessorSet, UpdateWorker, Watch, WorkQueue,
    WorkerContext, WorkerSettings,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct Pipeline {
    pub store: MemoryWatchStore,
    pub worker: UpdateWorker,
    pub queue: WorkQueue,
    pub notifications: UnboundedReceiver<NotificationPayload>,
}

impl Pipeline {
    pub fn new(settings: WorkerSettings) -> Self {
        let store = MemoryWatchStore::new();
        let queue = WorkQueue::new();
        let (tx, rx) = unbounded_channel();

        let fetcher = HttpFetcher::new(FetcherConfig {
            request_timeout: 5,
            user_agent: "UatuChangewatch-Test/1.0".to_string(),
        })
        .expect("http fetcher");

        let context = Arc::new(WorkerContext {
            store: Arc::new(store.clone()),
            fetchers: FetcherRegistry::new().with(Arc::new(fetcher)),
            processors: ProcessorSet::standard(Duration::from_secs(5)),
            queue: queue.clone(),
            notifications: tx,
            settings,
        });

        Self {
            store,
            worker: UpdateWorker::new(0, context, CancellationToken::new()),
            queue,
            notifications: rx,
        }
    }

    pub async fn add(&self, watch: Watch) -> String {
        let uuid = watch.uuid.clone();
        self.store.insert_watch(watch).await;
        uuid
    }

    pub async fn watch(&self, uuid: &str) -> Watch {
        use uatu_changewatch::WatchStore;
        self.store.get(uuid).await.unwrap().expect("watch exists")
    }
}

pub fn test_settings() -> WorkerSettings {
    let mut settings = WorkerSettings::default();
    settings.request_timeout = Duration::from_secs(5);
    settings.notifications.urls = vec!["https://hooks.example/global".to_string()];
    settings
}

/// Replace whatever the site serves at `route` with `body`.
pub async fn serve(server: &MockServer, route: &str, body: &str) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body.as_bytes().to_vec(), "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}
