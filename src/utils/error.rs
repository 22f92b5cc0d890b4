use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("History consistency error for watch {uuid}: {message}")]
    HistoryConsistency { uuid: String, message: String },

    #[error("Notification delivery error: {0}")]
    Delivery(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of a single failed processing attempt.
///
/// Every variant is per-attempt: the worker records it on the watch and
/// carries on with the next queue item.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Empty reply from server, status code {status_code}")]
    EmptyReply { status_code: u16, url: String },

    #[error("Got HTML content but no text found.")]
    ReplyWithContentButNoText,

    #[error("Warning, filter '{filter}' not found")]
    FilterNotFoundInResponse { filter: String },

    #[error("Screenshot unavailable, page did not render fully in the expected time")]
    ScreenshotUnavailable { status_code: u16, url: String },

    #[error("Page request from server didnt respond correctly: {message}")]
    PageUnloadable {
        status_code: Option<u16>,
        url: String,
        message: String,
    },

    #[error("Browser step {step_n} failed: {cause}")]
    BrowserStepFailed { step_n: usize, cause: String },

    #[error("Cannot run, more than one price detected, this mode is only for product pages with ONE product")]
    MoreThanOnePriceFound,

    #[error("Unable to extract restock data for this page (got code {status_code} from server for {url}), no embedded stock information was found and nothing interesting in the text")]
    RestockDataUnavailable { status_code: u16, url: String },

    #[error("Permission error: {0}")]
    Permission(String),

    #[error("{0}")]
    Unexpected(String),
}

impl CheckError {
    /// HTTP status worth persisting as `last_check_status`, if the failure has one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CheckError::EmptyReply { status_code, .. }
            | CheckError::ScreenshotUnavailable { status_code, .. }
            | CheckError::RestockDataUnavailable { status_code, .. } => Some(*status_code),
            CheckError::PageUnloadable { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckError::EmptyReply { .. } => "empty_reply",
            CheckError::ReplyWithContentButNoText => "no_text",
            CheckError::FilterNotFoundInResponse { .. } => "filter_not_found",
            CheckError::ScreenshotUnavailable { .. } => "screenshot_unavailable",
            CheckError::PageUnloadable { .. } => "page_unloadable",
            CheckError::BrowserStepFailed { .. } => "browser_step_failed",
            CheckError::MoreThanOnePriceFound => "more_than_one_price",
            CheckError::RestockDataUnavailable { .. } => "restock_data_unavailable",
            CheckError::Permission(_) => "permission",
            CheckError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<reqwest::Error> for CheckError {
    fn from(err: reqwest::Error) -> Self {
        CheckError::Unexpected(err.to_string())
    }
}

impl From<AppError> for CheckError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                CheckError::Permission(io.to_string())
            }
            other => CheckError::Unexpected(other.to_string()),
        }
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
