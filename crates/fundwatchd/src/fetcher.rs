use std::time::Duration;

use async_trait::async_trait;
use fundwatch_config::{DEFAULT_FETCH_TIMEOUT_SECS, SourceConfig};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue};
use thiserror::Error;

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Retrieves the raw source document. One attempt per call.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let timeout = if timeout.is_zero() {
            Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS)
        } else {
            timeout
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client, timeout })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, FetchError> {
        Self::new(&config.user_agent, Duration::from_secs(config.timeout_secs))
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_owned(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::Request {
                url: url.to_owned(),
                source: err,
            }
        }
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|err| self.classify(locator, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: locator.to_owned(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| self.classify(locator, err))?;
        tracing::info!(url = locator, bytes = body.len(), "fetched source document");
        Ok(body)
    }
}
