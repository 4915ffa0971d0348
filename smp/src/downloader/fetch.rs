//! The HTTP collaborator seam.
//!
//! The pipeline only needs "URL in, bytes + content-type out"; everything
//! else (TLS, proxies, retry pacing) stays behind the [`Fetcher`] trait so
//! tests can drive the whole download against a canned map of responses.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable as _};
use bytes::Bytes;
use log::debug;

/// Typed fetch failures. The scheduler's per-resource policy keys off
/// these: 4xx means "not there", the rest are transport-level.
#[derive(thiserror::Error, Debug, Clone)]
pub enum FetchError {
    #[error("HTTP status {status} fetching {url}")]
    Status { status: u16, url: String },

    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("Retries exhausted fetching {url}: {message}")]
    RetriesExhausted { url: String, message: String },
}

impl FetchError {
    /// The resource does not exist on the server (4xx).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if (400..500).contains(status))
    }

    /// Whether another attempt could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500,
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::RetriesExhausted { .. } => false,
        }
    }

    fn url(&self) -> &str {
        match self {
            Self::Status { url, .. }
            | Self::Network { url, .. }
            | Self::Timeout { url }
            | Self::RetriesExhausted { url, .. } => url,
        }
    }
}

/// A fetched resource body plus the server-declared content type.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Capability the download pipeline requires from an HTTP client.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError>;
}

/// Production fetcher: reqwest with a per-fetch timeout and exponential
/// backoff on retryable failures.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retries: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, retries: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client, retries })
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedResource, FetchError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let bytes = response.bytes().await.map_err(classify)?;
        Ok(FetchedResource {
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError> {
        let result = (|| self.fetch_once(url))
            .retry(
                ExponentialBuilder::default()
                    .with_max_times(self.retries)
                    .with_jitter(),
            )
            .when(FetchError::is_retryable)
            .notify(|err, dur| debug!("retrying {} in {dur:?}: {err}", err.url()))
            .await;

        result.map_err(|e| {
            if e.is_retryable() {
                FetchError::RetriesExhausted {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            } else {
                e
            }
        })
    }
}

/// Test fetcher serving canned responses; unknown URLs get a 404.
#[derive(Debug, Default, Clone)]
pub struct StaticFetcher {
    responses: HashMap<String, FetchedResource>,
}

impl StaticFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: &str, bytes: impl Into<Bytes>, content_type: &str) {
        self.responses.insert(
            url.to_string(),
            FetchedResource {
                bytes: bytes.into(),
                content_type: Some(content_type.to_string()),
            },
        );
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                status: 404,
                url: url.to_string(),
            })
    }
}
