//! Google Custom Search JSON API

use super::{status_error, SearchError, WebSearch};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
const RESULT_COUNT: u8 = 10;
const NO_RESULTS: &str = "No good Google Search Result was found";

pub struct GoogleSearch {
    client: Client,
    api_key: String,
    cse_id: String,
    endpoint: String,
}

impl GoogleSearch {
    pub fn new(api_key: impl Into<String>, cse_id: impl Into<String>) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SearchError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            cse_id: cse_id.into(),
            endpoint: ENDPOINT.to_string(),
        })
    }
}

#[async_trait]
impl WebSearch for GoogleSearch {
    async fn search(&self, query: &str) -> Result<String, SearchError> {
        let count = RESULT_COUNT.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cse_id.as_str()),
                ("q", query),
                ("num", count.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: SearchResponse = response.json().await?;
        tracing::debug!(query = %query, results = body.items.len(), "Google search completed");
        Ok(render(&body))
    }
}

fn render(response: &SearchResponse) -> String {
    if response.items.is_empty() {
        return NO_RESULTS.to_string();
    }
    response
        .items
        .iter()
        .map(|item| match &item.snippet {
            Some(snippet) => format!("{}: {} ({})", item.title, snippet.trim(), item.link),
            None => format!("{} ({})", item.title, item.link),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    snippet: Option<String>,
}
