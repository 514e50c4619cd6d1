use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::pin::Pin;
use std::time::Duration;

pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

const LOGGED_BODY_CHARS: usize = 200;

/// Fixed-delay retry budget for upstream calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream returned HTTP {status}")]
    Status { status: StatusCode, body: String },

    #[error("upstream request timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

impl UpstreamError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            UpstreamError::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Status { status, .. } => is_retryable_status(*status),
            UpstreamError::Timeout(_) | UpstreamError::Transport(_) => true,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout(e)
        } else {
            UpstreamError::Transport(e)
        }
    }
}

/// 5xx and 429 are worth another attempt; any other failure status is final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl UpstreamClient {
    /// `idle_timeout` bounds the wait for any single read, including each
    /// chunk of a streamed body.
    pub fn new(idle_timeout: Duration, retry: RetryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(idle_timeout)
            .read_timeout(idle_timeout)
            .build()?;
        Ok(Self::with_client(client, retry))
    }

    pub fn with_client(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// POST `body` and return the response body as a stream once a 2xx status
    /// arrives. Retryable failures are retried within the budget; the caller
    /// only sees the final outcome.
    pub async fn send(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamStream, UpstreamError> {
        let attempts = self.retry.max_retries + 1;
        let mut attempt: u32 = 0;

        loop {
            log::info!("Upstream attempt {}/{}: POST {}", attempt + 1, attempts, url);
            let err = match self.attempt(url, headers, body.clone()).await {
                Ok(stream) => {
                    log::info!("Upstream connection established, streaming response");
                    return Ok(stream);
                }
                Err(e) => e,
            };

            match &err {
                UpstreamError::Status { status, body } => log::error!(
                    "Upstream HTTP error {}: {}",
                    status,
                    truncate(body, LOGGED_BODY_CHARS)
                ),
                other => log::error!("Upstream request error: {}", other),
            }

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.retry.max_retries {
                log::error!("Upstream retries exhausted after {} attempts", attempts);
                return Err(err);
            }

            log::warn!(
                "Retryable upstream failure, retrying in {}ms",
                self.retry.backoff.as_millis()
            );
            tokio::time::sleep(self.retry.backoff).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamStream, UpstreamError> {
        let resp = self
            .client
            .post(url)
            .headers(headers.clone())
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status, body });
        }
        Ok(resp.bytes_stream().boxed())
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
