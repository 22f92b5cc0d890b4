use async_trait::async_trait;
use reqwest::header::{HeaderMap, USER_AGENT};
use reqwest::{Client, Method};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{ContentFetcher, FetchRequest, FetchResult, FetchedContent};
use crate::config::FetcherConfig;
use crate::models::FetchBackend;
use crate::utils::error::{AppError, CheckError};

/// Plain HTTP fetcher. No JavaScript, screenshots or browser steps.
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client, config })
    }

    fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }
}

/// Content types kept as raw bytes rather than decoded text.
fn is_binary_content_type(content_type: &str) -> bool {
    let content_type = content_type.to_lowercase();
    content_type.starts_with("image/")
        || content_type.starts_with("application/pdf")
        || content_type.starts_with("application/octet-stream")
}

fn declared_charset(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| {
            let (key, value) = part.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"'))
        })
        .filter(|charset| !charset.is_empty())
}

/// Decode a response body, sniffing the charset when the server did not
/// declare one.
pub fn decode_body(bytes: &[u8], content_type: &str) -> String {
    let declared = declared_charset(content_type)
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()));

    let encoding = match declared {
        Some(encoding) => encoding,
        None => {
            let mut detector = chardetng::EncodingDetector::new();
            detector.feed(bytes, true);
            let guessed = detector.guess(None, true);
            debug!("No declared charset, detected {}", guessed.name());
            guessed
        }
    };

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!("Malformed {} sequences replaced while decoding", encoding.name());
    }
    text.into_owned()
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    fn backend(&self) -> FetchBackend {
        FetchBackend::HttpRequests
    }

    async fn run(&self, request: &FetchRequest) -> Result<FetchResult, CheckError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|e| CheckError::Unexpected(format!("Invalid request method: {}", e)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.header("user-agent").is_none() {
            builder = builder.header(USER_AGENT, self.config.user_agent.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = Self::collect_headers(response.headers());
        let bytes = response.bytes().await?;

        debug!(
            "Fetched {} with status {} ({} bytes)",
            request.url,
            status.as_u16(),
            bytes.len()
        );

        if !request.ignore_status_codes
            && (status.is_client_error() || status.is_server_error() || bytes.is_empty())
        {
            return Err(CheckError::EmptyReply {
                status_code: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let content_type = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .unwrap_or_default();

        let content = if is_binary_content_type(content_type) {
            FetchedContent::Binary(bytes.to_vec())
        } else {
            FetchedContent::Text(decode_body(&bytes, content_type))
        };

        let mut result = FetchResult::new(status.as_u16(), content);
        result.headers = headers;
        Ok(result)
    }

    async fn is_ready(&self) -> bool {
        true
    }
}
