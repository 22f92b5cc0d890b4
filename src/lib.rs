pub mod config;
pub mod diff;
pub mod fetchers;
pub mod models;
pub mod notification;
pub mod processors;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod utils;
pub mod worker;

// Re-export commonly used types
pub use config::AppConfig;
pub use fetchers::{ContentFetcher, FetchRequest, FetchResult, FetcherRegistry};
pub use models::{Watch, WatchUpdate};
pub use processors::{ChangeProcessor, ProcessorSet};
pub use queue::WorkQueue;
pub use store::{MemoryWatchStore, WatchStore};
pub use utils::error::{AppError, CheckError};
pub use worker::{spawn_workers, CheckOutcome, UpdateWorker, WorkerContext, WorkerSettings};

pub type Result<T> = std::result::Result<T, AppError>;
