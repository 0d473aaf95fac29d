use std::time::Duration;

use bytes::{Bytes, BytesMut};
use engine_logging::{engine_debug, engine_warn};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::decode::decode_html;
use crate::retry::{retry_with_backoff, RetryDecision, RetryPolicy};
use crate::{FailureKind, FetchError, FetchMetadata, FetchOutput, FetchedPage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub page_timeout: Duration,
    /// Images are larger than HTML, so they get a longer per-attempt timeout.
    pub image_timeout: Duration,
    pub redirect_limit: usize,
    pub max_page_bytes: u64,
    pub max_image_bytes: u64,
    pub pool_max_idle_per_host: usize,
    pub allowed_content_types: Vec<String>,
    pub page_retry: RetryPolicy,
    pub image_retry: RetryPolicy,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0".to_string(),
            connect_timeout: Duration::from_secs(10),
            page_timeout: Duration::from_secs(20),
            image_timeout: Duration::from_secs(45),
            redirect_limit: 10,
            max_page_bytes: 5 * 1024 * 1024,
            max_image_bytes: 40 * 1024 * 1024,
            pool_max_idle_per_host: 128,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            page_retry: RetryPolicy::new(3, Duration::from_millis(550), Duration::from_millis(350)),
            image_retry: RetryPolicy::new(
                3,
                Duration::from_millis(350),
                Duration::from_millis(350),
            ),
        }
    }
}

/// Page and byte retrieval. Both operations retry internally and report
/// exhaustion as `None`; they never fail the caller.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Option<FetchedPage>;

    async fn download_bytes(&self, url: &str) -> Option<Bytes>;
}

/// Fetcher over one pooled `reqwest` client shared by every worker.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout)
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { client, settings })
    }

    /// The pooled client, for callers that talk to other HTTP endpoints.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// One attempt at fetching an HTML page.
    pub async fn try_fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let output = self
            .get(url, self.settings.page_timeout, self.settings.max_page_bytes, true)
            .await?;
        let decoded = decode_html(&output.bytes, output.metadata.content_type.as_deref());
        if decoded.had_errors {
            engine_debug!("lossy {} decode for {}", decoded.encoding_label, url);
        }
        Ok(FetchedPage {
            final_url: output.metadata.final_url,
            html: decoded.html,
        })
    }

    /// One attempt at downloading raw bytes.
    pub async fn try_download(&self, url: &str) -> Result<FetchOutput, FetchError> {
        self.get(url, self.settings.image_timeout, self.settings.max_image_bytes, false)
            .await
    }

    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        max_bytes: u64,
        html_only: bool,
    ) -> Result<FetchOutput, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;

        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let status_ok = if html_only {
            status == StatusCode::OK
        } else {
            status.is_success()
        };
        if !status_ok {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if html_only && !self.is_content_type_allowed(content_type.as_deref()) {
            return Err(FetchError::new(
                FailureKind::UnsupportedContentType {
                    content_type: content_type.unwrap_or_default(),
                },
                "not an html document",
            ));
        }

        let mut bytes = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let metadata = FetchMetadata {
            original_url: url.to_string(),
            final_url,
            content_type,
            byte_len: bytes.len() as u64,
        };

        Ok(FetchOutput {
            bytes: bytes.freeze(),
            metadata,
        })
    }

    fn is_content_type_allowed(&self, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch_page(&self, url: &str) -> Option<FetchedPage> {
        let result = retry_with_backoff(
            &self.settings.page_retry,
            url,
            classify_page_error,
            |_| self.try_fetch_page(url),
        )
        .await;
        match result {
            Ok(page) => Some(page),
            Err(err) => {
                match err.kind {
                    FailureKind::HttpStatus(_) | FailureKind::UnsupportedContentType { .. } => {
                        engine_debug!("skip page {}: {}", url, err);
                    }
                    _ => {
                        engine_warn!("skip page {}: {}", url, err);
                    }
                }
                None
            }
        }
    }

    async fn download_bytes(&self, url: &str) -> Option<Bytes> {
        let result = retry_with_backoff(
            &self.settings.image_retry,
            url,
            classify_download_error,
            |_| self.try_download(url),
        )
        .await;
        match result {
            Ok(output) => Some(output.bytes),
            Err(err) => {
                engine_warn!("download {} failed: {}", url, err);
                None
            }
        }
    }
}

/// Non-200 and non-HTML answers are final; only transport trouble is retried.
fn classify_page_error(err: &FetchError) -> RetryDecision {
    match err.kind {
        FailureKind::Timeout => RetryDecision::AfterTimeout,
        FailureKind::Network => RetryDecision::AfterError,
        _ => RetryDecision::Stop,
    }
}

fn classify_download_error(err: &FetchError) -> RetryDecision {
    if err.is_timeout() {
        RetryDecision::AfterTimeout
    } else if err.is_transient() {
        RetryDecision::AfterError
    } else {
        RetryDecision::Stop
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
