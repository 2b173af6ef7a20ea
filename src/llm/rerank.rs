//! Rerank client for Cohere-style `/rerank` endpoints: query + documents
//! in, `(index, relevance_score)` pairs out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{LlmError, RerankClient};

#[derive(Serialize, Debug)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize, Debug)]
struct RerankResponse {
    results: Vec<RerankRow>,
}

#[derive(Deserialize, Debug)]
struct RerankRow {
    index: usize,
    relevance_score: f32,
}

pub struct HttpRerank {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpRerank {
    pub fn new(client: reqwest::Client, url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl RerankClient for HttpRerank {
    async fn rerank(
        &self,
        api_key: &str,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<f32>, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&RerankRequest {
                model: &self.model,
                query,
                documents,
                top_n: documents.len(),
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let parsed: RerankResponse = response.json().await?;
        // indices the provider skipped stay at 0
        let mut scores = vec![0.0_f32; documents.len()];
        for row in parsed.results {
            if let Some(slot) = scores.get_mut(row.index) {
                *slot = row.relevance_score;
            }
        }
        Ok(scores)
    }
}
