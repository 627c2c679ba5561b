use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use crate::models::RankedItem;

/// Whether a failed upstream call is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream connection failed: {0}")]
    Connect(String),

    #[error("upstream responded with HTTP {status}")]
    Status { status: u16 },

    #[error("upstream response could not be decoded: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SourceError::Timeout | SourceError::Connect(_) => FailureKind::Transient,
            SourceError::Status { status } => {
                let status = *status;
                if status >= 500 || status == 408 || status == 429 {
                    FailureKind::Transient
                } else {
                    FailureKind::Permanent
                }
            }
            SourceError::Decode(_) => FailureKind::Permanent,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else if let Some(status) = err.status() {
            SourceError::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() || err.is_body() {
            SourceError::Decode(err.to_string())
        } else {
            SourceError::Connect(err.to_string())
        }
    }
}

/// The upstream that ranks stories and serves them one by one.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Ranked story ids, best first.
    async fn list_ids(&self) -> Result<Vec<u64>, SourceError>;

    /// A single item, or `None` when the upstream does not know the id.
    async fn get_item(&self, id: u64) -> Result<Option<RankedItem>, SourceError>;
}

#[derive(Debug, Clone)]
pub struct HackerNewsClientConfig {
    pub base_url: String,
    pub list_path: String,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HackerNewsClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://hacker-news.firebaseio.com/v0/".to_string(),
            list_path: "beststories.json".to_string(),
            request_timeout: Duration::from_secs(10),
            user_agent: concat!("hn_best_stories/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Client for the Hacker News Firebase API.
pub struct HackerNewsClient {
    client: Client,
    base_url: Url,
    list_path: String,
}

impl HackerNewsClient {
    pub fn new(config: &HackerNewsClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .context("failed to create HTTP client")?;

        // A base without a trailing slash would have its last segment replaced by `join`.
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("invalid base url {base}"))?;

        Ok(Self {
            client,
            base_url,
            list_path: config.list_path.trim_start_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.base_url
            .join(path)
            .map_err(|e| SourceError::Decode(format!("bad endpoint {path}: {e}")))
    }
}

#[async_trait]
impl SourceClient for HackerNewsClient {
    async fn list_ids(&self) -> Result<Vec<u64>, SourceError> {
        let url = self.endpoint(&self.list_path)?;
        let response = self.client.get(url).send().await?.error_for_status()?;

        // The list endpoint answers `null` when it has nothing to rank.
        let ids: Option<Vec<u64>> = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(ids.unwrap_or_default())
    }

    async fn get_item(&self, id: u64) -> Result<Option<RankedItem>, SourceError> {
        let url = self.endpoint(&format!("item/{id}.json"))?;
        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;

        // Unknown ids come back as `200 null`.
        response
            .json::<Option<RankedItem>>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}
