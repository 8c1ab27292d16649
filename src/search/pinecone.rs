//! Pinecone index query with OpenAI embeddings

use super::{status_error, KnowledgeBase, Passage, SearchError};
use crate::llm::DEFAULT_BASE_URL;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    /// Data-plane host of the index, e.g. `https://docs-abc123.svc.pinecone.io`
    pub index_host: String,
    pub embedding_api_key: String,
    pub embedding_base_url: Option<String>,
    pub embedding_model: String,
}

pub struct PineconeKnowledgeBase {
    client: Client,
    config: PineconeConfig,
}

impl PineconeKnowledgeBase {
    pub fn new(config: PineconeConfig) -> Result<Self, SearchError> {
        if !config.index_host.starts_with("https://") && !config.index_host.starts_with("http://") {
            return Err(SearchError::NotConfigured(format!(
                "index host must be an http(s) URL, got {:?}",
                config.index_host
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SearchError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let root = self
            .config
            .embedding_base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        // Chunks were embedded with newlines flattened; match that.
        let input = text.replace('\n', " ");

        let response = self
            .client
            .post(format!("{root}/embeddings"))
            .bearer_auth(&self.config.embedding_api_key)
            .json(&EmbeddingRequest {
                model: &self.config.embedding_model,
                input: &input,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: EmbeddingResponse = response.json().await?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| SearchError::Decode("embedding response had no data".into()))
    }
}

#[async_trait]
impl KnowledgeBase for PineconeKnowledgeBase {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, SearchError> {
        let vector = self.embed(query).await?;
        let host = self.config.index_host.trim_end_matches('/');

        let response = self
            .client
            .post(format!("{host}/query"))
            .header("Api-Key", &self.config.api_key)
            .json(&QueryRequest {
                vector,
                top_k,
                include_metadata: true,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: QueryResponse = response.json().await?;
        let passages = passages(body, top_k);
        tracing::debug!(query = %query, passages = passages.len(), "Knowledge base query completed");
        Ok(passages)
    }
}

/// Matches without text metadata are skipped; the rest are ordered best first.
fn passages(response: QueryResponse, top_k: usize) -> Vec<Passage> {
    let mut passages: Vec<Passage> = response
        .matches
        .into_iter()
        .filter_map(|m| {
            let text = m.metadata?.text?;
            Some(Passage {
                text,
                score: m.score,
            })
        })
        .collect();
    passages.sort_by(|a, b| b.score.total_cmp(&a.score));
    passages.truncate(top_k);
    passages
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    vector: Vec<f32>,
    top_k: usize,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    #[serde(default)]
    score: f32,
    metadata: Option<MatchMetadata>,
}

#[derive(Debug, Deserialize)]
struct MatchMetadata {
    text: Option<String>,
}
