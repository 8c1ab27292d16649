//! External retrieval collaborators: web search and the knowledge base

mod google;
mod pinecone;

pub use google::GoogleSearch;
pub use pinecone::{PineconeConfig, PineconeKnowledgeBase, DEFAULT_EMBEDDING_MODEL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Http(String),
    #[error("search backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected search response: {0}")]
    Decode(String),
    #[error("search is not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SearchError::Decode(e.to_string())
        } else {
            SearchError::Http(e.to_string())
        }
    }
}

/// Retrieved knowledge-base passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Search results rendered as text
    async fn search(&self, query: &str) -> Result<String, SearchError>;
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Up to `top_k` passages, best first
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, SearchError>;
}

#[async_trait]
impl<T: WebSearch + ?Sized> WebSearch for Arc<T> {
    async fn search(&self, query: &str) -> Result<String, SearchError> {
        (**self).search(query).await
    }
}

#[async_trait]
impl<T: KnowledgeBase + ?Sized> KnowledgeBase for Arc<T> {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, SearchError> {
        (**self).search(query, top_k).await
    }
}

/// Read the body of a failed response into a [`SearchError::Status`]
async fn status_error(response: reqwest::Response) -> SearchError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SearchError::Status { status, body }
}
