use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::retry::{RetryPolicy, is_retryable_error, is_retryable_status};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Gave up on {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    /// False for definitive upstream answers and local misconfiguration.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Exhausted { .. } | FetchError::Http { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("vini-data/", env!("CARGO_PKG_VERSION")).to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// GET-only client for the upstream portal.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetches a page body, retrying transient failures with linear backoff.
    pub async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let policy = self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let last_error = match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(url = %url, attempt, "Fetched page");
                        return response.text().await.map_err(|source| FetchError::Http {
                            url: url.to_string(),
                            source,
                        });
                    }
                    if !is_retryable_status(status) {
                        return Err(FetchError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    format!("HTTP {status}")
                }
                Err(source) => {
                    if !is_retryable_error(&source) {
                        return Err(FetchError::Http {
                            url: url.to_string(),
                            source,
                        });
                    }
                    source.to_string()
                }
            };

            if !policy.can_retry(attempt) {
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    last_error,
                });
            }

            let delay = policy.delay_for_attempt(attempt);
            warn!(
                url = %url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Transient fetch failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
