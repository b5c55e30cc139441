//! Conversation-history transport

use crate::error::RemoteError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sessioncache_foundation::{EntryFacets, RemoteTierConfig};
use std::time::Duration;
use tracing::debug;

/// One row of the summary listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "agentId")]
    pub agent_id: Option<String>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "messageCount")]
    pub message_count: u64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ConversationSummary {
    pub fn facets(&self) -> EntryFacets {
        EntryFacets {
            title: self.title.clone(),
            agent_id: self.agent_id.clone(),
            timestamp: self.updated_at,
            tags: self.tags.clone(),
        }
    }
}

/// Read-only access to the history service
#[async_trait]
pub trait HistoryTransport: Send + Sync {
    /// Full conversation payload
    async fn fetch_conversation(&self, id: &str) -> Result<Value, RemoteError>;

    /// Most recent conversations, newest first
    async fn list_summaries(&self, limit: usize) -> Result<Vec<ConversationSummary>, RemoteError>;

    /// Whether the service is reachable
    async fn health(&self) -> bool;
}

#[async_trait]
impl<T: HistoryTransport + ?Sized> HistoryTransport for Box<T> {
    async fn fetch_conversation(&self, id: &str) -> Result<Value, RemoteError> {
        (**self).fetch_conversation(id).await
    }

    async fn list_summaries(&self, limit: usize) -> Result<Vec<ConversationSummary>, RemoteError> {
        (**self).list_summaries(limit).await
    }

    async fn health(&self) -> bool {
        (**self).health().await
    }
}

/// HTTP transport:
/// - `GET {base}/conversations/{id}`
/// - `GET {base}/conversations?limit=N`
/// - `GET {base}/health`
pub struct HttpHistoryTransport {
    client: Client,
    base_url: String,
    base: Url,
    api_key: Option<String>,
}

impl HttpHistoryTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                RemoteError::NotConfigured(format!("Failed to create HTTP client: {}", e))
            })?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url).map_err(|e| {
            RemoteError::NotConfigured(format!("Invalid base URL {}: {}", base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::NotConfigured(format!("Invalid base URL {}", base_url)));
        }
        Ok(Self {
            client,
            base_url,
            base,
            api_key: None,
        })
    }

    pub fn from_config(config: &RemoteTierConfig) -> Result<Self, RemoteError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| RemoteError::NotConfigured("remote.base_url is not set".into()))?;
        let mut transport = Self::new(base_url, config.timeout())?;
        transport.api_key = config.api_key.clone();
        Ok(transport)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/{segments..}` with every segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// URL for one conversation; ids that would escape their path segment are rejected
    pub fn conversation_url(&self, id: &str) -> Result<Url, RemoteError> {
        if id.is_empty() || id == "." || id == ".." {
            return Err(RemoteError::NotFound(format!("invalid conversation id {:?}", id)));
        }
        Ok(self.endpoint(&["conversations", id]))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn checked(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_http_status(status.as_u16(), &body, retry_after))
    }
}

#[async_trait]
impl HistoryTransport for HttpHistoryTransport {
    async fn fetch_conversation(&self, id: &str) -> Result<Value, RemoteError> {
        let url = self.conversation_url(id)?;
        debug!(url = %url, "Fetching conversation");

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(RemoteError::from_reqwest)?;

        Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }

    async fn list_summaries(&self, limit: usize) -> Result<Vec<ConversationSummary>, RemoteError> {
        let url = self.endpoint(&["conversations"]);
        debug!(url = %url, limit, "Listing conversations");

        let response = self
            .authorize(self.client.get(url).query(&[("limit", limit)]))
            .send()
            .await
            .map_err(RemoteError::from_reqwest)?;

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Listing {
            Bare(Vec<ConversationSummary>),
            Wrapped { conversations: Vec<ConversationSummary> },
        }

        let listing: Listing = Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        Ok(match listing {
            Listing::Bare(items) => items,
            Listing::Wrapped { conversations } => conversations,
        })
    }

    async fn health(&self) -> bool {
        let url = self.endpoint(&["health"]);
        self.authorize(self.client.get(url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
