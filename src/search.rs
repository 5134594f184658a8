//! Web-search collaborator
//!
//! The research stage only sees the [`SearchClient`] trait. [`TavilyClient`]
//! talks to the Tavily Search API:
//!
//! - Typed HTTP errors classified as transient (timeouts, connection
//!   failures, 429, 5xx) or permanent (401, 400, malformed bodies)
//! - Configurable timeout and base URL
//! - No retry loop here: the fallback invoker owns retry and backoff

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::SearchError;
use crate::state::{SearchDepth, SearchHit};

/// Default timeout for Tavily API requests
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Production Tavily endpoint
const TAVILY_BASE_URL: &str = "https://api.tavily.com";

/// Upper bound Tavily accepts for `max_results`
const MAX_RESULTS_LIMIT: usize = 20;

/// A web-search capability.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Search for `query`, returning hits in relevance order.
    async fn search(
        &self,
        query: &str,
        depth: SearchDepth,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SearchError>;

    /// Provider name, used as the invoker endpoint id
    fn name(&self) -> &str;
}

/// Tavily Search API client
///
/// # Example
/// ```ignore
/// let client = TavilyClient::new("your-api-key");
/// let hits = client.search("Rust async programming", SearchDepth::Basic, 5).await?;
/// ```
pub struct TavilyClient {
    api_key: String,
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl TavilyClient {
    /// Create a new client with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            base_url: TAVILY_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Point the client at another server (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Execute a single HTTP request
    async fn execute(&self, request: &TavilyRequest) -> Result<TavilyResponse, TavilyError> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TavilyError::Timeout
                } else if e.is_connect() {
                    TavilyError::Connection(e.to_string())
                } else {
                    TavilyError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        TavilyError::Timeout
                    } else if e.is_decode() {
                        TavilyError::ParseError(e.to_string())
                    } else {
                        TavilyError::Network(e.to_string())
                    }
                });
        }

        let error_text = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => Err(TavilyError::Unauthorized),
            429 => Err(TavilyError::RateLimited),
            400 => Err(TavilyError::BadRequest(error_text)),
            500..=599 => Err(TavilyError::ServerError(status.as_u16(), error_text)),
            _ => Err(TavilyError::HttpError(status.as_u16(), error_text)),
        }
    }
}

#[async_trait]
impl SearchClient for TavilyClient {
    async fn search(
        &self,
        query: &str,
        depth: SearchDepth,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let request = TavilyRequest {
            query: query.to_string(),
            max_results: max_results.clamp(1, MAX_RESULTS_LIMIT),
            search_depth: depth,
            topic: "general",
            include_answer: false,
            include_raw_content: false,
        };

        debug!(query = %query, depth = %depth, max_results = request.max_results, "Calling Tavily");

        let response = self.execute(&request).await?;
        let hits: Vec<SearchHit> = response.results.into_iter().map(SearchHit::from).collect();

        info!(query = %query, count = hits.len(), "Search completed");
        Ok(hits)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

/// Typed errors for Tavily API
#[derive(Debug, thiserror::Error)]
pub enum TavilyError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized - check API key")]
    Unauthorized,

    #[error("Rate limited - too many requests")]
    RateLimited,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("HTTP error ({0}): {1}")]
    HttpError(u16, String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl TavilyError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TavilyError::Timeout
                | TavilyError::Connection(_)
                | TavilyError::Network(_)
                | TavilyError::RateLimited
                | TavilyError::ServerError(_, _)
        )
    }
}

impl From<TavilyError> for SearchError {
    fn from(e: TavilyError) -> Self {
        SearchError {
            transient: e.is_retryable(),
            message: format!("Tavily API error: {}", e),
        }
    }
}

/// Request body for Tavily API
#[derive(Debug, Serialize)]
struct TavilyRequest {
    query: String,
    max_results: usize,
    search_depth: SearchDepth,
    topic: &'static str,
    include_answer: bool,
    include_raw_content: bool,
}

/// Response from Tavily API
#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

/// Individual search result
#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

impl From<TavilyResult> for SearchHit {
    fn from(r: TavilyResult) -> Self {
        SearchHit::new(r.url, r.content, r.score).with_title(r.title)
    }
}
