//! Board API HTTP client + local vote receipt storage.

mod receipts;

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use qboard_core::{Item, ItemId, NewItem, SubmitResponse, VoteRequest, VoteResponse};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub use receipts::{receipt_key, FileReceiptStore, MemoryReceiptStore, VoteReceiptStore};

pub const CRATE_NAME: &str = "qboard-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Retry schedule for reads. Mutations are sent exactly once.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The backend surface the sync engine consumes.
#[async_trait]
pub trait BoardApi: Send + Sync {
    /// All items of the board, optionally filtered server-side by `query`.
    async fn list_items(&self, query: Option<&str>) -> Result<Vec<Item>, FetchError>;

    async fn submit_item(&self, content: &str) -> Result<SubmitResponse, FetchError>;

    async fn vote(&self, id: ItemId, request: VoteRequest) -> Result<VoteResponse, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpBoardClient {
    client: reqwest::Client,
    base_url: Url,
    board: String,
    backoff: BackoffPolicy,
}

impl HttpBoardClient {
    pub fn new(
        base_url: &str,
        board: impl Into<String>,
        config: HttpClientConfig,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let base_url =
            Url::parse(base_url).with_context(|| format!("parsing base url {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("base url {base_url} cannot carry a path");
        }

        Ok(Self {
            client,
            base_url,
            board: board.into(),
            backoff: config.backoff,
        })
    }

    pub fn board(&self) -> &str {
        &self.board
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn items_url(&self, query: Option<&str>) -> Result<Url, FetchError> {
        let mut url = self.endpoint(&["api", &self.board, "questions"])?;
        if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) {
            url.query_pairs_mut().append_pair("q", query);
        }
        Ok(url)
    }

    pub fn vote_url(&self, id: ItemId) -> Result<Url, FetchError> {
        let id = id.to_string();
        self.endpoint(&["api", &self.board, "questions", &id, "vote"])
    }

    pub async fn recent_boards(&self) -> Result<Vec<String>, FetchError> {
        let url = self.endpoint(&["api", "boards", "recent"])?;
        self.get_json(url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let span = info_span!("board_get", board = %self.board, url = %url);
        self.get_with_retries(url).instrument(span).await
    }

    async fn get_with_retries<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let mut attempt = 0usize;
        loop {
            match self.client.get(url.clone()).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.bytes().await?;
                        return Ok(serde_json::from_slice(&body)?);
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(attempt, status = status.as_u16(), "retrying read");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(attempt, error = %err, "retrying read");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<Vec<u8>, FetchError> {
        let span = info_span!("board_post", board = %self.board, url = %url);
        self.post_once(url, body).instrument(span).await
    }

    async fn post_once<B: Serialize + Sync>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<Vec<u8>, FetchError> {
        let resp = self.client.post(url.clone()).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl BoardApi for HttpBoardClient {
    async fn list_items(&self, query: Option<&str>) -> Result<Vec<Item>, FetchError> {
        let url = self.items_url(query)?;
        self.get_json(url).await
    }

    async fn submit_item(&self, content: &str) -> Result<SubmitResponse, FetchError> {
        let url = self.items_url(None)?;
        let body = self
            .post_json(
                url,
                &NewItem {
                    content: content.to_string(),
                },
            )
            .await?;
        // Any 2xx counts as success; the body is informational.
        Ok(serde_json::from_slice(&body).unwrap_or_default())
    }

    async fn vote(&self, id: ItemId, request: VoteRequest) -> Result<VoteResponse, FetchError> {
        let url = self.vote_url(id)?;
        let body = self.post_json(url, &request).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str, board: &str) -> HttpBoardClient {
        HttpBoardClient::new(base, board, HttpClientConfig::default()).expect("client")
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn items_url_encodes_board_and_trimmed_query() {
        let c = client("http://localhost:5000", "my board");
        assert_eq!(
            c.items_url(Some("  tacos & pizza ")).unwrap().as_str(),
            "http://localhost:5000/api/my%20board/questions?q=tacos+%26+pizza"
        );
        assert_eq!(
            c.items_url(Some("   ")).unwrap().as_str(),
            "http://localhost:5000/api/my%20board/questions"
        );
    }

    #[test]
    fn endpoints_respect_base_path_prefix() {
        let c = client("http://example.test/board-app/", "general");
        assert_eq!(
            c.vote_url(ItemId(12)).unwrap().as_str(),
            "http://example.test/board-app/api/general/questions/12/vote"
        );
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(HttpBoardClient::new("mailto:someone", "general", HttpClientConfig::default())
            .is_err());
        assert!(HttpBoardClient::new("not a url", "general", HttpClientConfig::default()).is_err());
    }
}
