use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod notification;
pub mod restock;
pub mod update;
pub mod watch;

// Re-exports for convenience
pub use notification::*;
pub use restock::*;
pub use update::*;
pub use watch::*;

/// Which fetcher retrieves a watch's content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchBackend {
    /// Plain HTTP client.
    #[default]
    #[serde(alias = "html_requests")]
    HttpRequests,
    /// Remote browser session.
    #[serde(alias = "html_webdriver")]
    Browser,
}

impl FetchBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchBackend::HttpRequests => "http_requests",
            FetchBackend::Browser => "browser",
        }
    }
}

/// Which change processor reduces a fetch into a change decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    #[default]
    #[serde(alias = "text_json_diff")]
    TextDiff,
    #[serde(alias = "restock_diff")]
    RestockDiff,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum NotificationFormat {
    #[default]
    #[serde(rename = "text", alias = "Text")]
    Text,
    #[serde(rename = "markdown", alias = "Markdown")]
    Markdown,
    #[serde(rename = "html", alias = "HTML")]
    Html,
}

impl NotificationFormat {
    /// Line separator used when rendering diffs for this format.
    pub fn line_separator(&self) -> &'static str {
        match self {
            NotificationFormat::Html => "</br>",
            NotificationFormat::Text | NotificationFormat::Markdown => "\n",
        }
    }
}

/// Which in-stock transitions count as a change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InStockProcessing {
    AllChanges,
    #[default]
    InStockOnly,
    Off,
}

// Helper function to generate watch identifiers
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_backend_serialization() {
        assert_eq!(
            serde_json::to_string(&FetchBackend::HttpRequests).unwrap(),
            "\"http_requests\""
        );
        assert_eq!(
            serde_json::from_str::<FetchBackend>("\"html_webdriver\"").unwrap(),
            FetchBackend::Browser
        );
    }

    #[test]
    fn test_processor_kind_aliases() {
        assert_eq!(
            serde_json::from_str::<ProcessorKind>("\"restock_diff\"").unwrap(),
            ProcessorKind::RestockDiff
        );
        assert_eq!(
            serde_json::from_str::<ProcessorKind>("\"text_diff\"").unwrap(),
            ProcessorKind::TextDiff
        );
    }

    #[test]
    fn test_notification_format_separator() {
        assert_eq!(NotificationFormat::Html.line_separator(), "</br>");
        assert_eq!(NotificationFormat::Text.line_separator(), "\n");
        assert_eq!(
            serde_json::from_str::<NotificationFormat>("\"HTML\"").unwrap(),
            NotificationFormat::Html
        );
    }

    #[test]
    fn test_in_stock_processing_values() {
        let values = vec![
            InStockProcessing::AllChanges,
            InStockProcessing::InStockOnly,
            InStockProcessing::Off,
        ];
        for value in values {
            let serialized = serde_json::to_string(&value).unwrap();
            let deserialized: InStockProcessing = serde_json::from_str(&serialized).unwrap();
            assert_eq!(value, deserialized);
        }
        assert_eq!(InStockProcessing::default(), InStockProcessing::InStockOnly);
    }
}
